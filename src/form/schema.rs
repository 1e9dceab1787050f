use super::controller::FormController;
use super::error::FormResult;
use super::field::FormValues;

/// A model struct whose fields map one-to-one onto form fields.
///
/// Usually implemented with `#[derive(FormFields)]`, which also generates the
/// `{Model}Fields` accessor returning a typed `FieldId` per struct field.
pub trait FormSchema: Sized + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;

    /// Registers every field with this value as its initial value.
    fn register(&self, form: &FormController) -> FormResult<()>;

    /// `None` when any field is missing or not readable as its type.
    fn from_values(values: &FormValues) -> Option<Self>;
}

impl FormController {
    pub fn register_schema<M: FormSchema>(&self, model: &M) -> FormResult<()> {
        model.register(self)
    }

    pub fn model<M: FormSchema>(&self) -> FormResult<Option<M>> {
        Ok(M::from_values(&self.values()?))
    }
}
