use std::sync::Arc;

use super::controller::FormController;
use super::error::{FormError, FormResult};
use super::field::FieldPath;

/// Carries the enclosing form down to bindings.
///
/// Contexts nest: `with_form` returns a child that shadows the forms of its
/// ancestors, and `outer` walks back up.
#[derive(Clone, Default)]
pub struct FormContext {
    form: Option<FormController>,
    parent: Option<Arc<FormContext>>,
}

impl FormContext {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn with_form(&self, form: FormController) -> Self {
        Self {
            form: Some(form),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn has_form(&self) -> bool {
        self.form.is_some()
    }

    pub fn form(&self) -> FormResult<FormController> {
        self.lookup(None)
    }

    /// Same as [`form`](Self::form), naming `path` in the error.
    pub fn form_for(&self, path: &FieldPath) -> FormResult<FormController> {
        self.lookup(Some(path))
    }

    pub fn outer(&self) -> Option<&FormContext> {
        self.parent.as_deref()
    }

    fn lookup(&self, path: Option<&FieldPath>) -> FormResult<FormController> {
        match &self.form {
            Some(form) => Ok(form.clone()),
            None => {
                let error = FormError::NoEnclosingForm(path.cloned());
                tracing::error!(%error, "form lookup failed");
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for FormContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormContext")
            .field("form", &self.form.as_ref().map(FormController::form_id))
            .field("nested", &self.parent.is_some())
            .finish()
    }
}
