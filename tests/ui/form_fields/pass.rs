use calmform::form::{FieldId, FormController, FormSchema};

#[derive(Clone, Debug, PartialEq, calmform::form::FormFields)]
struct SignupForm {
    email: String,
    accept_terms: bool,
}

fn main() {
    let fields = SignupForm::fields();
    let email: FieldId<String> = fields.email();
    assert_eq!(email.path().as_str(), "email");
    assert_eq!(fields.accept_terms().path().as_str(), "accept_terms");

    let form = FormController::default();
    let model = SignupForm {
        email: "a@calm.form".to_string(),
        accept_terms: false,
    };
    model.register(&form).expect("register fields");
    form.set_value(&fields.accept_terms(), true)
        .expect("set value");

    let values = form.values().expect("values");
    let restored = SignupForm::from_values(&values).expect("complete model");
    assert_eq!(restored.email, "a@calm.form");
    assert!(restored.accept_terms);
}
