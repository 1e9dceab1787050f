mod binding;
mod context;
mod controller;
mod definition;
mod error;
mod field;
mod options;
mod persist;
mod propagation;
mod registry;
mod schema;
mod store;
mod subscription;
mod validation;

#[cfg(test)]
mod tests;

pub use binding::FieldBinding;
pub use calmform_derive::FormFields;
pub use context::FormContext;
pub use controller::{
    FormController, FormErrors, FormId, FormSnapshot, FormStep, SubmitOutcome, SubmitState,
    ValidationTicket,
};
pub use definition::{FieldDefinition, FieldMeta};
pub use error::{FormError, FormResult};
pub use field::{FieldId, FieldPath, FieldValue, FormValues};
pub use options::{AutovalidateMode, FormOptions};
pub use persist::PersistedFormState;
pub use propagation::{AsyncDerivation, Derivation, DerivationId};
pub use schema::FormSchema;
pub use store::FieldState;
pub use subscription::{FieldAspect, FormAspect, Subscription, Topic};
pub use validation::{
    AsyncFieldValidator, BoxedValidationFuture, FieldValidation, FieldValidator, ValidationStatus,
};
