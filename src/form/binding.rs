use std::sync::Arc;

use super::context::FormContext;
use super::controller::FormController;
use super::definition::{FieldDefinition, FieldMeta};
use super::error::FormResult;
use super::field::{FieldId, FieldValue};
use super::subscription::{FieldAspect, FormAspect, Listener, Subscription, Topic};
use super::validation::FieldValidation;

/// Headless binding between one view and one field.
///
/// The binding registers its field on attach and owns the subscriptions made
/// through [`watch`](Self::watch); dropping it unsubscribes them. It never
/// unregisters the field unless [`detach`](Self::detach) is called.
pub struct FieldBinding<V: FieldValue> {
    form: FormController,
    id: FieldId<V>,
    subscriptions: Vec<Subscription>,
}

impl<V: FieldValue> FieldBinding<V> {
    pub fn attach(ctx: &FormContext, id: &FieldId<V>) -> FormResult<Self> {
        Self::attach_with(ctx, FieldDefinition::new(id))
    }

    pub fn attach_with(ctx: &FormContext, definition: FieldDefinition<V>) -> FormResult<Self> {
        let id = definition.id().clone();
        let form = ctx.form_for(id.path())?;
        form.register(definition)?;
        Ok(Self {
            form,
            id,
            subscriptions: Vec::new(),
        })
    }

    pub fn id(&self) -> &FieldId<V> {
        &self.id
    }

    pub fn form(&self) -> &FormController {
        &self.form
    }

    /// Calls `on_rebuild` whenever one of `aspects` of this field changes.
    pub fn watch(
        &mut self,
        aspects: &[FieldAspect],
        on_rebuild: impl Fn(&Topic) + Send + Sync + 'static,
    ) -> FormResult<()> {
        let listener: Listener = Arc::new(on_rebuild);
        for aspect in aspects {
            let topic = Topic::Field(self.id.path().clone(), *aspect);
            let subscription = self.form.subscribe_shared(topic, listener.clone())?;
            self.subscriptions.push(subscription);
        }
        Ok(())
    }

    pub fn watch_form(
        &mut self,
        aspects: &[FormAspect],
        on_rebuild: impl Fn(&Topic) + Send + Sync + 'static,
    ) -> FormResult<()> {
        let listener: Listener = Arc::new(on_rebuild);
        for aspect in aspects {
            let subscription = self
                .form
                .subscribe_shared(Topic::Form(*aspect), listener.clone())?;
            self.subscriptions.push(subscription);
        }
        Ok(())
    }

    pub fn value(&self) -> FormResult<Option<V>> {
        self.form.get_value(&self.id)
    }

    pub fn change(&self, value: V) -> FormResult<()> {
        self.form.set_value(&self.id, value)
    }

    pub async fn change_async(&self, value: V) -> FormResult<()> {
        self.form.set_value_async(&self.id, value).await
    }

    pub fn blur(&self) -> FormResult<()> {
        self.form.mark_touched(&self.id)
    }

    pub fn validation(&self) -> FormResult<Option<FieldValidation>> {
        self.form.validation(&self.id)
    }

    pub fn error_for_display(&self) -> FormResult<Option<String>> {
        self.form.field_error_for_display(&self.id)
    }

    pub fn meta(&self) -> FormResult<Option<FieldMeta>> {
        self.form.field_meta(&self.id)
    }

    pub fn label(&self) -> FormResult<Option<String>> {
        Ok(self.meta()?.and_then(|meta| meta.label))
    }

    pub fn hint(&self) -> FormResult<Option<String>> {
        Ok(self.meta()?.and_then(|meta| meta.hint))
    }

    pub fn is_required(&self) -> FormResult<bool> {
        Ok(self.meta()?.is_some_and(|meta| meta.required))
    }

    /// Unsubscribes and unregisters the field, parking its state when the
    /// form is configured to preserve unregistered fields.
    pub fn detach(mut self) -> FormResult<bool> {
        self.subscriptions.clear();
        let preserve = self.form.options().preserve_on_unregister;
        self.form.unregister(&self.id, preserve)
    }
}

impl<V: FieldValue> std::fmt::Debug for FieldBinding<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("id", &self.id)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
