pub use crate::form::{
    AsyncDerivation, AutovalidateMode, Derivation, FieldAspect, FieldBinding, FieldDefinition,
    FieldId, FieldPath, FormAspect, FormContext, FormController, FormError, FormFields,
    FormOptions, FormResult, FormSchema, FormStep, FormValues, PersistedFormState, SubmitOutcome,
    SubmitState, Topic, ValidationStatus,
};
