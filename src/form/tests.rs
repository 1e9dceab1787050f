use super::*;
use futures::channel::oneshot;
use futures::executor::{LocalPool, block_on};
use futures::task::{FutureObj, LocalSpawnExt, Spawn, SpawnError};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects spawned tasks so a test decides when they run.
#[derive(Clone, Default)]
struct QueueSpawner {
    tasks: Arc<Mutex<Vec<FutureObj<'static, ()>>>>,
}

impl Spawn for QueueSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.tasks.lock().expect("queue lock").push(future);
        Ok(())
    }
}

impl QueueSpawner {
    fn queued(&self) -> usize {
        self.tasks.lock().expect("queue lock").len()
    }

    fn drive(&self, pool: &mut LocalPool) {
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("queue lock"));
        for task in tasks {
            pool.spawner().spawn_obj(task).expect("spawn queued task");
        }
        pool.run_until_stalled();
    }
}

/// Async results released by the test, keyed by the input they answer.
struct Gates<T> {
    pending: Arc<Mutex<BTreeMap<String, oneshot::Receiver<T>>>>,
}

impl<T> Clone for Gates<T> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<T> Gates<T> {
    fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn open(&self, key: &str) -> oneshot::Sender<T> {
        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .expect("gates lock")
            .insert(key.to_owned(), receiver);
        sender
    }

    fn take(&self, key: &str) -> Option<oneshot::Receiver<T>> {
        self.pending.lock().expect("gates lock").remove(key)
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Topic) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let listener = {
        let count = count.clone();
        move |_: &Topic| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    };
    (count, listener)
}

fn always() -> FormOptions {
    FormOptions::default().autovalidate(AutovalidateMode::Always)
}

fn non_negative(value: &i64, _values: &FormValues) -> Result<(), String> {
    if *value >= 0 {
        Ok(())
    } else {
        Err("Must be positive".to_owned())
    }
}

fn not_empty(value: &String, _values: &FormValues) -> Result<(), String> {
    if value.trim().is_empty() {
        Err("required".to_owned())
    } else {
        Ok(())
    }
}

#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, FormFields)]
struct Profile {
    email: String,
    age: u32,
    nickname: Option<String>,
}

#[test]
fn age_validator_tracks_latest_value() {
    let form = FormController::new(always());
    let age = FieldId::<i64>::new("age");
    form.register(
        FieldDefinition::new(&age)
            .initial_value(-1)
            .validator(non_negative),
    )
    .expect("register age");

    assert!(!form.is_valid().expect("validity"));
    let validation = form.validation(&age).expect("read").expect("age state");
    assert!(!validation.is_valid);
    assert_eq!(validation.error_message.as_deref(), Some("Must be positive"));

    form.set_value(&age, 5).expect("set age");
    assert!(form.is_valid().expect("validity"));
    let validation = form.validation(&age).expect("read").expect("age state");
    assert!(validation.is_valid);
    assert_eq!(validation.error_message, None);
}

#[test]
fn dirty_tracks_registration_baseline() {
    let form = FormController::default();
    let name = FieldId::<String>::new("name");
    form.register(FieldDefinition::new(&name).initial_value("Ann".to_owned()))
        .expect("register");

    assert!(!form.is_dirty(&name).expect("dirty"));
    form.set_value(&name, "Bob".to_owned()).expect("set");
    assert!(form.is_dirty(&name).expect("dirty"));
    assert!(form.is_form_dirty().expect("form dirty"));
    form.set_value(&name, "Ann".to_owned()).expect("set back");
    assert!(!form.is_dirty(&name).expect("dirty"));

    // A field added later gets its own baseline.
    let late = FieldId::<u32>::new("late");
    form.register(FieldDefinition::new(&late).initial_value(7))
        .expect("register late");
    assert!(!form.is_dirty(&late).expect("dirty"));
    assert_eq!(form.get_value(&late).expect("read"), Some(7));
}

#[test]
fn reregistration_keeps_edited_value_unless_forced() {
    let form = FormController::default();
    let name = FieldId::<String>::new("name");
    form.register(FieldDefinition::new(&name).initial_value("a".to_owned()))
        .expect("register");
    form.set_value(&name, "edited".to_owned()).expect("set");

    form.register(
        FieldDefinition::new(&name)
            .initial_value("b".to_owned())
            .label("Name"),
    )
    .expect("re-register");
    assert_eq!(form.get_value(&name).expect("read").as_deref(), Some("edited"));
    assert!(form.is_dirty(&name).expect("dirty"));
    assert_eq!(
        form.field_meta(&name).expect("meta").and_then(|meta| meta.label),
        Some("Name".to_owned())
    );

    form.register(
        FieldDefinition::new(&name)
            .initial_value("c".to_owned())
            .force_reset(),
    )
    .expect("force reset");
    assert_eq!(form.get_value(&name).expect("read").as_deref(), Some("c"));
    assert!(!form.is_dirty(&name).expect("dirty"));
    assert!(!form.is_touched(&name).expect("touched"));
}

#[test]
fn auto_registered_field_adopts_first_initial_value() {
    let form = FormController::default();
    let city = FieldId::<String>::new("address.city");
    form.mark_touched(&city).expect("touch unknown field");
    assert!(form.is_registered(city.path()).expect("registered"));
    assert_eq!(form.get_value(&city).expect("read"), None);

    form.register(FieldDefinition::new(&city).initial_value("Oslo".to_owned()))
        .expect("register");
    assert_eq!(form.get_value(&city).expect("read").as_deref(), Some("Oslo"));
    assert!(!form.is_dirty(&city).expect("dirty"));
    assert!(form.is_touched(&city).expect("touched"));
}

#[test]
fn late_full_registration_validates_the_adopted_value() {
    let form = FormController::new(always());
    let age = FieldId::<i64>::new("age");
    let band = FieldId::<String>::new("band");
    form.register(FieldDefinition::new(&age)).expect("lazy register");
    form.register(FieldDefinition::new(&band).initial_value(String::new()))
        .expect("register band");
    let read_age = age.clone();
    form.derive(Derivation::new(&age, &band, move |values: &FormValues| {
        Ok(match values.get(&read_age) {
            Some(age) if age < 0 => "unknown".to_owned(),
            Some(_) => "known".to_owned(),
            None => String::new(),
        })
    }))
    .expect("derive band");
    assert!(form.is_valid().expect("validity"));

    form.register(
        FieldDefinition::new(&age)
            .initial_value(-1)
            .validator(non_negative),
    )
    .expect("full register");
    assert_eq!(form.get_value(&age).expect("read"), Some(-1));
    assert!(!form.is_dirty(&age).expect("dirty"));
    assert_eq!(
        form.validation_status(&age).expect("status"),
        Some(ValidationStatus::Invalid("Must be positive".to_owned()))
    );
    assert!(!form.is_valid().expect("validity"));
    assert_eq!(
        form.get_value(&band).expect("read").as_deref(),
        Some("unknown")
    );
}

#[test]
fn merged_validator_runs_against_current_value() {
    let form = FormController::new(always());
    let age = FieldId::<i64>::new("age");
    form.register(FieldDefinition::new(&age).initial_value(-3))
        .expect("register");
    assert!(form.is_field_valid(&age).expect("valid"));

    form.register(FieldDefinition::new(&age).validator(non_negative))
        .expect("add validator");
    assert!(!form.is_field_valid(&age).expect("valid"));

    let lazy = FormController::default();
    lazy.register(FieldDefinition::new(&age)).expect("lazy register");
    lazy.register(
        FieldDefinition::new(&age)
            .initial_value(-1)
            .validator(non_negative),
    )
    .expect("full register");
    assert_eq!(
        lazy.validation_status(&age).expect("status"),
        Some(ValidationStatus::Pristine)
    );
}

#[test]
fn autovalidate_policies() {
    let email = FieldId::<String>::new("email");
    let definition = || {
        FieldDefinition::new(&email)
            .initial_value(String::new())
            .validator(not_empty)
    };

    let on_interaction = FormController::default();
    on_interaction.register(definition()).expect("register");
    assert_eq!(
        on_interaction.validation_status(&email).expect("status"),
        Some(ValidationStatus::Pristine)
    );
    on_interaction.mark_touched(&email).expect("touch");
    assert_eq!(
        on_interaction.validation_status(&email).expect("status"),
        Some(ValidationStatus::Invalid("required".to_owned()))
    );

    let never = FormController::new(FormOptions::default().autovalidate(AutovalidateMode::Never));
    never.register(definition()).expect("register");
    never.set_value(&email, " ".to_owned()).expect("set");
    never.mark_touched(&email).expect("touch");
    assert!(never.is_valid().expect("validity"));
    assert!(!never.validate_form().expect("explicit validation"));
    assert_eq!(
        never.errors().expect("errors").get(email.path()).map(String::as_str),
        Some("required")
    );
}

#[test]
fn dependents_revalidate_when_source_changes() {
    let form = FormController::new(always());
    let password = FieldId::<String>::new("password");
    let confirm = FieldId::<String>::new("confirm");
    form.register(FieldDefinition::new(&password).initial_value("pass".to_owned()))
        .expect("register password");
    let source = password.clone();
    form.register(
        FieldDefinition::new(&confirm)
            .initial_value("pass".to_owned())
            .depends_on(&password)
            .validator(move |value: &String, values: &FormValues| {
                if values.get(&source).as_ref() == Some(value) {
                    Ok(())
                } else {
                    Err("password mismatch".to_owned())
                }
            }),
    )
    .expect("register confirm");
    assert!(form.is_valid().expect("validity"));

    form.set_value(&password, "new-pass".to_owned()).expect("set");
    assert_eq!(
        form.field_error_for_display(&confirm).expect("display"),
        None,
        "untouched fields hide their error"
    );
    assert_eq!(
        form.errors().expect("errors").get(confirm.path()).map(String::as_str),
        Some("password mismatch")
    );
}

#[test]
fn dangling_dependency_is_skipped() {
    let form = FormController::new(always());
    let password = FieldId::<String>::new("password");
    let confirm = FieldId::<String>::new("confirm");
    form.register(FieldDefinition::new(&password)).expect("register");
    form.register(
        FieldDefinition::new(&confirm)
            .depends_on(&password)
            .validator(not_empty),
    )
    .expect("register dependent");
    assert!(form.unregister(&confirm, false).expect("unregister"));

    form.set_value(&password, "secret".to_owned())
        .expect("write must not fail on a dangling dependency");
    assert!(!form.is_registered(confirm.path()).expect("registered"));
}

#[test]
fn panicking_validator_marks_field_invalid() {
    let form = FormController::new(always().validator_fallback_message("Something went wrong"));
    let code = FieldId::<String>::new("code");
    form.register(
        FieldDefinition::new(&code)
            .initial_value("ok".to_owned())
            .validator(|value: &String, _: &FormValues| {
                if value == "boom" {
                    panic!("validator exploded");
                }
                Ok(())
            }),
    )
    .expect("register");

    form.set_value(&code, "boom".to_owned()).expect("set survives panic");
    assert_eq!(
        form.validation_status(&code).expect("status"),
        Some(ValidationStatus::Invalid("Something went wrong".to_owned()))
    );
    form.set_value(&code, "fine".to_owned()).expect("set");
    assert!(form.is_field_valid(&code).expect("valid"));
}

#[test]
fn type_mismatch_is_rejected() {
    let form = FormController::default();
    let age = FieldId::<i64>::new("age");
    form.register(FieldDefinition::new(&age).initial_value(3))
        .expect("register");

    let as_text = FieldId::<String>::new("age");
    let error = form.get_value(&as_text).expect_err("typed read must fail");
    assert!(matches!(error, FormError::FieldTypeMismatch { .. }));
    let error = form
        .set_value(&as_text, "three".to_owned())
        .expect_err("typed write must fail");
    assert!(matches!(error, FormError::FieldTypeMismatch { .. }));
    assert_eq!(form.get_value(&age).expect("read"), Some(3));
}

#[test]
fn async_validation_latest_ticket_wins() {
    let mut pool = LocalPool::new();
    let spawner = QueueSpawner::default();
    let form = FormController::default().with_spawner(spawner.clone());
    let username = FieldId::<String>::new("username");
    let gates = Gates::<Result<(), String>>::new();
    let lookup = gates.clone();
    form.register(FieldDefinition::new(&username).async_validator(
        move |value: String, _values: FormValues| {
            let gate = lookup.take(&value);
            async move {
                match gate {
                    Some(gate) => gate
                        .await
                        .unwrap_or_else(|_| Err("lookup dropped".to_owned())),
                    None => Ok(()),
                }
            }
        },
    ))
    .expect("register");

    let first = gates.open("taken");
    let second = gates.open("free");
    form.set_value(&username, "taken".to_owned()).expect("first write");
    spawner.drive(&mut pool);
    form.set_value(&username, "free".to_owned()).expect("second write");
    spawner.drive(&mut pool);

    assert_eq!(
        form.validation_status(&username).expect("status"),
        Some(ValidationStatus::Validating)
    );
    assert!(form.is_pending(&username).expect("pending"));
    assert!(form.is_valid().expect("validating counts as valid"));

    second.send(Ok(())).expect("release second");
    pool.run_until_stalled();
    first
        .send(Err("already taken".to_owned()))
        .expect("release first");
    pool.run_until_stalled();

    assert_eq!(
        form.validation_status(&username).expect("status"),
        Some(ValidationStatus::Valid)
    );
    assert!(!form.is_pending(&username).expect("pending"));
    assert!(form.errors().expect("errors").is_empty());
}

#[test]
fn debounced_validation_runs_once_for_a_burst() {
    let form = FormController::new(always());
    let email = FieldId::<String>::new("email");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    form.register(FieldDefinition::new(&email).async_validator_with_debounce(
        Duration::from_millis(20),
        move |value: String, _values: FormValues| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if value.contains("bad") {
                    Err("email invalid".to_owned())
                } else {
                    Ok(())
                }
            }
        },
    ))
    .expect("register");

    block_on(async {
        futures::join!(
            form.set_value_async(&email, "bad@example.com".to_owned()),
            form.set_value_async(&email, "good@example.com".to_owned()),
        )
    })
    .0
    .expect("first write");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        form.get_value(&email).expect("read").as_deref(),
        Some("good@example.com")
    );
    assert!(form.is_field_valid(&email).expect("valid"));
}

#[test]
fn debounced_derivation_computes_once_for_a_burst() {
    let form = FormController::default();
    let query = FieldId::<String>::new("query");
    let suggestions = FieldId::<Vec<String>>::new("suggestions");
    form.register(FieldDefinition::new(&query)).expect("register query");
    form.register(FieldDefinition::new(&suggestions).initial_value(Vec::new()))
        .expect("register suggestions");

    let computed = Arc::new(Mutex::new(Vec::new()));
    let seen = computed.clone();
    let source = query.clone();
    form.derive_async(
        AsyncDerivation::new(&query, &suggestions, move |values: FormValues| {
            let query = values.get(&source).unwrap_or_default();
            seen.lock().expect("computed").push(query.clone());
            async move {
                Ok::<Vec<String>, String>(vec![format!("{query}-lang"), format!("{query}-book")])
            }
        })
        .debounce(Duration::from_millis(20)),
    )
    .expect("derive");

    let (first, second, third) = block_on(async {
        futures::join!(
            form.set_value_async(&query, "r".to_owned()),
            form.set_value_async(&query, "ru".to_owned()),
            form.set_value_async(&query, "rust".to_owned()),
        )
    });
    first.expect("first write");
    second.expect("second write");
    third.expect("third write");

    assert_eq!(*computed.lock().expect("computed"), vec!["rust".to_owned()]);
    assert_eq!(
        form.get_value(&suggestions).expect("read"),
        Some(vec!["rust-lang".to_owned(), "rust-book".to_owned()])
    );
    assert!(!form.is_pending(&suggestions).expect("pending"));
}

#[test]
fn async_validation_is_deferred_without_spawner() {
    let form = FormController::default();
    let handle = FieldId::<String>::new("handle");
    form.register(FieldDefinition::new(&handle).async_validator(
        |_value: String, _values: FormValues| async { Err::<(), String>("taken".to_owned()) },
    ))
    .expect("register");

    form.set_value(&handle, "ann".to_owned()).expect("set");
    assert!(form.is_field_valid(&handle).expect("valid"));
    assert!(!form.is_pending(&handle).expect("pending"));

    assert!(!block_on(form.validate_field_async(&handle)).expect("validate"));
    assert_eq!(
        form.validation_status(&handle).expect("status"),
        Some(ValidationStatus::Invalid("taken".to_owned()))
    );
}

#[test]
fn async_derivation_discards_stale_country_results() {
    let mut pool = LocalPool::new();
    let spawner = QueueSpawner::default();
    let form = FormController::default().with_spawner(spawner.clone());
    let country = FieldId::<String>::new("country");
    let city_options = FieldId::<Vec<String>>::new("cityOptions");
    let city = FieldId::<Option<String>>::new("city");
    form.register(FieldDefinition::new(&country)).expect("register country");
    form.register(FieldDefinition::new(&city_options).initial_value(Vec::new()))
        .expect("register options");
    form.register(FieldDefinition::new(&city).initial_value(None))
        .expect("register city");
    form.set_value(&city, Some("Seattle".to_owned())).expect("pick city");

    let gates = Gates::<Result<Vec<String>, String>>::new();
    let fetch = gates.clone();
    let source = country.clone();
    form.derive_async(
        AsyncDerivation::new(&country, &city_options, move |values: FormValues| {
            let gate = values
                .get(&source)
                .and_then(|country| fetch.take(&country));
            async move {
                match gate {
                    Some(gate) => gate
                        .await
                        .unwrap_or_else(|_| Err("fetch dropped".to_owned())),
                    None => Err("unknown country".to_owned()),
                }
            }
        })
        .resets(&city),
    )
    .expect("derive");

    let usa = gates.open("USA");
    let canada = gates.open("Canada");
    form.set_value(&country, "USA".to_owned()).expect("pick USA");
    assert_eq!(form.get_value(&city).expect("read"), None);
    spawner.drive(&mut pool);
    assert!(form.is_pending(&city_options).expect("pending"));

    form.set_value(&country, "Canada".to_owned()).expect("pick Canada");
    spawner.drive(&mut pool);

    canada
        .send(Ok(vec!["Toronto".to_owned(), "Vancouver".to_owned()]))
        .expect("resolve Canada");
    pool.run_until_stalled();
    usa.send(Ok(vec!["Seattle".to_owned(), "Boston".to_owned()]))
        .expect("resolve USA");
    pool.run_until_stalled();

    assert_eq!(
        form.get_value(&city_options).expect("read"),
        Some(vec!["Toronto".to_owned(), "Vancouver".to_owned()])
    );
    assert_eq!(form.get_value(&city).expect("read"), None);
    assert!(!form.is_pending(&city_options).expect("pending"));
    assert!(!form.is_form_pending().expect("form pending"));
}

#[test]
fn sync_derivation_updates_target_and_stops_at_depth_cap() {
    let form = FormController::new(FormOptions::default().max_propagation_depth(4));
    let first = FieldId::<String>::new("first");
    let last = FieldId::<String>::new("last");
    let full = FieldId::<String>::new("full");
    for id in [&first, &last, &full] {
        form.register(FieldDefinition::new(id).initial_value(String::new()))
            .expect("register");
    }
    let (first_id, last_id) = (first.clone(), last.clone());
    let id = form
        .derive(Derivation::new(&first, &full, move |values: &FormValues| {
            Ok(format!(
                "{} {}",
                values.get(&first_id).unwrap_or_default(),
                values.get(&last_id).unwrap_or_default()
            ))
        }))
        .expect("derive");
    form.set_value(&last, "Lovelace".to_owned()).expect("set last");
    form.set_value(&first, "Ada".to_owned()).expect("set first");
    assert_eq!(
        form.get_value(&full).expect("read").as_deref(),
        Some("Ada Lovelace")
    );
    assert!(!form.is_touched(&full).expect("derived writes are not touches"));

    assert!(form.remove_derivation(id).expect("remove"));
    assert!(!form.remove_derivation(id).expect("remove twice"));
    form.set_value(&first, "Grace".to_owned()).expect("set first");
    assert_eq!(
        form.get_value(&full).expect("read").as_deref(),
        Some("Ada Lovelace")
    );

    let a = FieldId::<i64>::new("a");
    let b = FieldId::<i64>::new("b");
    form.register(FieldDefinition::new(&a).initial_value(0)).expect("register a");
    form.register(FieldDefinition::new(&b).initial_value(0)).expect("register b");
    let (read_a, read_b) = (a.clone(), b.clone());
    form.derive(Derivation::new(&a, &b, move |values: &FormValues| {
        Ok(values.get(&read_a).unwrap_or_default() + 1)
    }))
    .expect("derive b");
    form.derive(Derivation::new(&b, &a, move |values: &FormValues| {
        Ok(values.get(&read_b).unwrap_or_default() + 1)
    }))
    .expect("derive a");

    form.set_value(&a, 10).expect("oscillating write still returns");
    assert_eq!(form.get_value(&a).expect("read"), Some(14));
    assert_eq!(form.get_value(&b).expect("read"), Some(13));
}

#[test]
fn failing_derivation_keeps_target_value() {
    let form = FormController::default();
    let amount = FieldId::<String>::new("amount");
    let cents = FieldId::<i64>::new("cents");
    form.register(FieldDefinition::new(&amount)).expect("register");
    form.register(FieldDefinition::new(&cents).initial_value(100))
        .expect("register");
    let source = amount.clone();
    form.derive(Derivation::new(&amount, &cents, move |values: &FormValues| {
        let text = values.get(&source).unwrap_or_default();
        if text == "panic" {
            panic!("parser exploded");
        }
        text.parse::<i64>().map_err(|error| error.to_string())
    }))
    .expect("derive");

    form.set_value(&amount, "250".to_owned()).expect("set");
    assert_eq!(form.get_value(&cents).expect("read"), Some(250));
    form.set_value(&amount, "abc".to_owned()).expect("set");
    assert_eq!(form.get_value(&cents).expect("read"), Some(250));
    form.set_value(&amount, "panic".to_owned()).expect("set");
    assert_eq!(form.get_value(&cents).expect("read"), Some(250));
    assert_eq!(form.get_value(&amount).expect("read").as_deref(), Some("panic"));
}

#[test]
fn unregister_preserves_state_on_request() {
    let form = FormController::default();
    let name = FieldId::<String>::new("name");
    let definition = || FieldDefinition::new(&name).initial_value("initial".to_owned());

    form.register(definition()).expect("register");
    form.set_value(&name, "edited".to_owned()).expect("set");
    assert!(form.unregister(&name, true).expect("unregister"));
    assert!(!form.is_registered(name.path()).expect("registered"));
    assert_eq!(form.get_value(&name).expect("read"), None);

    form.register(definition()).expect("register again");
    assert_eq!(form.get_value(&name).expect("read").as_deref(), Some("edited"));
    assert!(form.is_dirty(&name).expect("dirty"));

    form.unregister(&name, false).expect("unregister");
    form.register(
        FieldDefinition::new(&name).initial_value("next".to_owned()),
    )
    .expect("register again");
    assert_eq!(form.get_value(&name).expect("read").as_deref(), Some("next"));
    assert!(!form.is_dirty(&name).expect("dirty"));
}

#[test]
fn subscriptions_are_scoped_to_field_and_aspect() {
    let form = FormController::default();
    let email = FieldId::<String>::new("email");
    let name = FieldId::<String>::new("name");
    form.register(
        FieldDefinition::new(&email)
            .initial_value("a@example.com".to_owned())
            .validator(not_empty),
    )
    .expect("register email");
    form.register(FieldDefinition::new(&name)).expect("register name");

    let (validation_hits, on_validation) = counter();
    let (value_hits, on_value) = counter();
    let (name_hits, on_name) = counter();
    let (dirty_hits, on_form_dirty) = counter();
    let validation_sub = form
        .subscribe_field(&email, FieldAspect::Validation, on_validation)
        .expect("subscribe");
    let _value_sub = form
        .subscribe_field(&email, FieldAspect::Value, on_value)
        .expect("subscribe");
    let _name_sub = form
        .subscribe_field(&name, FieldAspect::Value, on_name)
        .expect("subscribe");
    let _dirty_sub = form
        .subscribe_form(FormAspect::Dirty, on_form_dirty)
        .expect("subscribe");

    form.set_value(&email, "b@example.com".to_owned()).expect("set");
    assert_eq!(value_hits.load(Ordering::SeqCst), 1);
    assert_eq!(validation_hits.load(Ordering::SeqCst), 1, "pristine -> valid");
    assert_eq!(dirty_hits.load(Ordering::SeqCst), 1);

    form.set_value(&email, "c@example.com".to_owned()).expect("set");
    assert_eq!(value_hits.load(Ordering::SeqCst), 2);
    assert_eq!(
        validation_hits.load(Ordering::SeqCst),
        1,
        "value-only change must not notify validation watchers"
    );
    assert_eq!(dirty_hits.load(Ordering::SeqCst), 1);

    form.set_value(&email, "c@example.com".to_owned()).expect("equal write");
    assert_eq!(value_hits.load(Ordering::SeqCst), 2);
    assert_eq!(name_hits.load(Ordering::SeqCst), 0);

    assert_eq!(form.listener_count().expect("count"), 4);
    drop(validation_sub);
    assert_eq!(form.listener_count().expect("count"), 3);
    form.set_value(&email, String::new()).expect("set");
    assert_eq!(validation_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_listener_does_not_stop_others() {
    let form = FormController::default();
    let name = FieldId::<String>::new("name");
    form.register(FieldDefinition::new(&name)).expect("register");
    let _bad = form
        .subscribe_field(&name, FieldAspect::Value, |_: &Topic| panic!("listener exploded"))
        .expect("subscribe");
    let (hits, listener) = counter();
    let _good = form
        .subscribe_field(&name, FieldAspect::Value, listener)
        .expect("subscribe");

    form.set_value(&name, "x".to_owned()).expect("set");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    form.set_value(&name, "y".to_owned()).expect("form stays usable");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn reset_restores_baselines_and_supersedes_async_work() {
    let mut pool = LocalPool::new();
    let spawner = QueueSpawner::default();
    let form = FormController::default().with_spawner(spawner.clone());
    let name = FieldId::<String>::new("name");
    form.register(
        FieldDefinition::new(&name)
            .initial_value("Ann".to_owned())
            .async_validator(|_value: String, _values: FormValues| async {
                Err::<(), String>("rejected".to_owned())
            }),
    )
    .expect("register");
    form.define_steps(vec![FormStep::new("one"), FormStep::new("two")])
        .expect("steps");
    form.go_to_step(1).expect("step");
    let (resets, on_reset) = counter();
    let _reset_sub = form
        .subscribe_form(FormAspect::Reset, on_reset)
        .expect("subscribe");

    form.set_value(&name, "Bob".to_owned()).expect("set");
    form.mark_touched(&name).expect("touch");
    assert_eq!(spawner.queued(), 1);
    form.reset().expect("reset");
    spawner.drive(&mut pool);

    let state = form
        .field_state(name.path())
        .expect("state")
        .expect("registered");
    assert_eq!(state.value, serde_json::json!("Ann"));
    assert!(!state.dirty && !state.touched && !state.pending);
    assert_eq!(state.validation, ValidationStatus::Pristine);
    let snapshot = form.snapshot().expect("snapshot");
    assert_eq!(snapshot.reset_count, 1);
    assert_eq!(snapshot.current_step, 0);
    assert_eq!(snapshot.submit_state, SubmitState::Idle);
    assert_eq!(resets.load(Ordering::SeqCst), 1);
}

#[test]
fn reset_field_only_touches_one_field() {
    let form = FormController::default();
    let first = FieldId::<String>::new("first");
    let second = FieldId::<String>::new("second");
    form.register(FieldDefinition::new(&first).initial_value("a".to_owned()))
        .expect("register");
    form.register(FieldDefinition::new(&second).initial_value("b".to_owned()))
        .expect("register");
    form.set_value(&first, "x".to_owned()).expect("set");
    form.set_value(&second, "y".to_owned()).expect("set");

    form.reset_field(&first).expect("reset field");
    assert_eq!(form.get_value(&first).expect("read").as_deref(), Some("a"));
    assert_eq!(form.get_value(&second).expect("read").as_deref(), Some("y"));
    assert_eq!(form.snapshot().expect("snapshot").reset_count, 0);
}

#[test]
fn submit_calls_on_error_and_settles_failed() {
    let form = FormController::default();
    let email = FieldId::<String>::new("email");
    form.register(
        FieldDefinition::new(&email)
            .initial_value(String::new())
            .validator(not_empty),
    )
    .expect("register");
    assert_eq!(form.field_error_for_display(&email).expect("display"), None);

    let reported = Arc::new(Mutex::new(FormErrors::new()));
    let sink = reported.clone();
    let outcome = block_on(form.submit(
        |_values: FormValues| async {
            Err::<(), FormError>(FormError::SubmitFailed("on_valid must not run".to_owned()))
        },
        move |errors: FormErrors| async move {
            *sink.lock().expect("errors lock") = errors;
        },
    ))
    .expect("submit");

    assert_eq!(outcome, SubmitOutcome::Invalid);
    assert_eq!(
        reported.lock().expect("errors lock").get(email.path()).map(String::as_str),
        Some("required")
    );
    let snapshot = form.snapshot().expect("snapshot");
    assert_eq!(snapshot.submit_state, SubmitState::Failed);
    assert_eq!(snapshot.submit_count, 1);
    assert_eq!(
        form.field_error_for_display(&email).expect("display").as_deref(),
        Some("required")
    );
}

#[test]
fn submit_hands_values_to_on_valid() {
    let form = FormController::default();
    let email = FieldId::<String>::new("email");
    form.register(
        FieldDefinition::new(&email)
            .initial_value("ann@example.com".to_owned())
            .validator(not_empty),
    )
    .expect("register");

    let submitted = Arc::new(Mutex::new(None));
    let sink = submitted.clone();
    let read = email.clone();
    let outcome = block_on(form.submit(
        move |values: FormValues| async move {
            *sink.lock().expect("submitted lock") = values.get(&read);
            Ok::<(), FormError>(())
        },
        |_errors: FormErrors| async {},
    ))
    .expect("submit");

    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(
        submitted.lock().expect("submitted lock").as_deref(),
        Some("ann@example.com")
    );
    assert_eq!(
        form.snapshot().expect("snapshot").submit_state,
        SubmitState::Succeeded
    );
}

#[test]
fn submit_state_resets_after_handler_error_or_panic() {
    let form = FormController::default();

    let error = block_on(form.submit(
        |_values: FormValues| async {
            Err::<(), FormError>(FormError::SubmitFailed("server down".to_owned()))
        },
        |_errors: FormErrors| async {},
    ))
    .expect_err("handler error surfaces");
    assert_eq!(error, FormError::SubmitFailed("server down".to_owned()));
    assert_eq!(
        form.snapshot().expect("snapshot").submit_state,
        SubmitState::Failed
    );
    assert!(!form.is_submitting().expect("submitting"));

    let explode = true;
    let panicked = std::panic::catch_unwind(AssertUnwindSafe(|| {
        block_on(form.submit(
            move |_values: FormValues| async move {
                if explode {
                    panic!("handler exploded");
                }
                Ok::<(), FormError>(())
            },
            |_errors: FormErrors| async {},
        ))
    }));
    assert!(panicked.is_err());
    assert!(!form.is_submitting().expect("submitting"));
    assert_eq!(
        form.snapshot().expect("snapshot").submit_state,
        SubmitState::Failed
    );
    assert_eq!(form.snapshot().expect("snapshot").submit_count, 2);
}

#[test]
fn concurrent_submit_is_rejected() {
    let mut pool = LocalPool::new();
    let form = FormController::default();
    let (release, gate) = oneshot::channel::<()>();
    let background = form.clone();
    pool.spawner()
        .spawn_local(async move {
            background
                .submit(
                    move |_values: FormValues| async move {
                        let _ = gate.await;
                        Ok::<(), FormError>(())
                    },
                    |_errors: FormErrors| async {},
                )
                .await
                .expect("first submit");
        })
        .expect("spawn submit");
    pool.run_until_stalled();
    assert!(form.is_submitting().expect("submitting"));

    let error = block_on(form.submit(
        |_values: FormValues| async { Ok::<(), FormError>(()) },
        |_errors: FormErrors| async {},
    ))
    .expect_err("second submit must be rejected");
    assert_eq!(error, FormError::AlreadySubmitting);

    release.send(()).expect("release submit");
    pool.run_until_stalled();
    assert_eq!(
        form.snapshot().expect("snapshot").submit_state,
        SubmitState::Succeeded
    );
}

#[test]
fn steps_advance_only_when_current_step_is_valid() {
    let form = FormController::default();
    let name = FieldId::<String>::new("name");
    let age = FieldId::<i64>::new("age");
    form.register(
        FieldDefinition::new(&name)
            .initial_value(String::new())
            .validator(not_empty),
    )
    .expect("register");
    form.register(
        FieldDefinition::new(&age)
            .initial_value(-1)
            .validator(non_negative),
    )
    .expect("register");
    form.define_steps(vec![
        FormStep::new("identity").field(&name),
        FormStep::new("details").field(&age),
    ])
    .expect("steps");

    assert!(!form.next_step().expect("next"));
    assert_eq!(form.current_step().expect("step"), 0);
    assert!(!form.is_field_valid(&name).expect("valid"));

    form.set_value(&name, "Ann".to_owned()).expect("set");
    assert!(form.next_step().expect("next"));
    assert_eq!(form.current_step().expect("step"), 1);
    assert!(!block_on(form.next_step_async()).expect("last step"));

    assert!(form.previous_step().expect("previous"));
    assert!(!form.previous_step().expect("previous at start"));
    assert_eq!(
        form.go_to_step(5).expect_err("out of range"),
        FormError::StepOutOfRange { index: 5, count: 2 }
    );
}

#[test]
fn persisted_state_round_trips_through_json() {
    let form = FormController::new(always());
    let age = FieldId::<i64>::new("age");
    let name = FieldId::<String>::new("profile.name");
    form.register(
        FieldDefinition::new(&age)
            .initial_value(-1)
            .validator(non_negative),
    )
    .expect("register");
    form.register(FieldDefinition::new(&name).initial_value("Ann".to_owned()))
        .expect("register");
    form.set_value(&name, "Bob".to_owned()).expect("set");
    form.mark_touched(&name).expect("touch");
    form.define_steps(vec![FormStep::new("a"), FormStep::new("b")])
        .expect("steps");
    form.go_to_step(1).expect("step");
    form.reset_field(&age).expect("reset field");
    form.set_value(&age, -4).expect("set");

    let persisted = form.persist().expect("persist");
    let json = persisted.to_json().expect("json");
    let shape: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    for key in [
        "values",
        "validations",
        "dirtyStates",
        "touchedStates",
        "pendingStates",
        "isSubmitting",
        "resetCount",
        "currentStep",
    ] {
        assert!(shape.get(key).is_some(), "missing `{key}`");
    }
    assert_eq!(
        shape["validations"]["age"]["errorMessage"],
        serde_json::json!("Must be positive")
    );

    let restored = FormController::default();
    restored
        .restore(PersistedFormState::from_json(&json).expect("parse"))
        .expect("restore");
    assert_eq!(restored.persist().expect("persist"), persisted);
    assert_eq!(restored.get_value(&age).expect("read"), Some(-4));
    assert!(restored.is_dirty(&name).expect("dirty"));
    assert!(restored.is_touched(&name).expect("touched"));
    assert!(!restored.is_valid().expect("validity"));
    assert_eq!(restored.current_step().expect("step"), 1);
}

#[test]
fn restore_measures_dirtiness_against_local_baseline() {
    let name = FieldId::<String>::new("name");
    let source = FormController::default();
    source
        .register(FieldDefinition::new(&name).initial_value("a".to_owned()))
        .expect("register");
    source.set_value(&name, "b".to_owned()).expect("set");
    let persisted = source.persist().expect("persist");
    assert_eq!(persisted.dirty_states.get(name.path()), Some(&true));

    let caught_up = FormController::default();
    caught_up
        .register(FieldDefinition::new(&name).initial_value("b".to_owned()))
        .expect("register");
    caught_up.restore(persisted.clone()).expect("restore");
    let state = caught_up
        .field_state(name.path())
        .expect("read")
        .expect("name state");
    assert_eq!(state.value, serde_json::json!("b"));
    assert_eq!(state.initial, serde_json::json!("b"));
    assert!(!state.dirty);
    assert!(!caught_up.is_form_dirty().expect("form dirty"));

    let untouched = FormController::default();
    untouched
        .register(FieldDefinition::new(&name).initial_value("c".to_owned()))
        .expect("register");
    untouched.restore(source.persist().expect("persist")).expect("restore");
    assert!(untouched.is_dirty(&name).expect("dirty"));
}

#[test]
fn restored_submitting_state_does_not_block_submit() {
    let form = FormController::default();
    let email = FieldId::<String>::new("email");
    form.register(FieldDefinition::new(&email).initial_value("a@example.com".to_owned()))
        .expect("register");
    let mut persisted = form.persist().expect("persist");
    persisted.is_submitting = true;

    let restored = FormController::default();
    restored.restore(persisted.clone()).expect("restore");
    assert!(restored.is_submitting().expect("submitting"));
    assert_eq!(restored.persist().expect("persist"), persisted);

    let outcome = block_on(restored.submit(
        |_values: FormValues| async { Ok::<(), FormError>(()) },
        |_errors: FormErrors| async {},
    ))
    .expect("submit after restore");
    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(
        restored.snapshot().expect("snapshot").submit_state,
        SubmitState::Succeeded
    );
}

#[test]
fn malformed_persisted_state_is_an_error() {
    let error = PersistedFormState::from_json("{\"values\": 3}").expect_err("bad shape");
    assert!(matches!(error, FormError::Persistence(_)));
    let empty = PersistedFormState::from_json("{}").expect("defaults");
    assert_eq!(empty, PersistedFormState::default());
}

#[test]
fn context_without_form_fails_loudly() {
    let root = FormContext::root();
    assert_eq!(root.form().expect_err("no form"), FormError::NoEnclosingForm(None));

    let email = FieldId::<String>::new("email");
    let error = FieldBinding::attach(&root, &email).expect_err("binding needs a form");
    assert_eq!(error, FormError::NoEnclosingForm(Some(email.path().clone())));
    assert!(error.to_string().contains("`email`"));
}

#[test]
fn nested_context_shadows_outer_form() {
    let outer_form = FormController::default();
    let inner_form = FormController::default();
    let outer = FormContext::root().with_form(outer_form.clone());
    let inner = outer.with_form(inner_form.clone());

    assert_eq!(inner.form().expect("inner").form_id(), inner_form.form_id());
    assert_eq!(
        inner.outer().expect("parent").form().expect("outer").form_id(),
        outer_form.form_id()
    );
    assert!(!inner.outer().and_then(FormContext::outer).is_some_and(FormContext::has_form));
}

#[test]
fn binding_registers_watches_and_detaches() {
    let form = FormController::new(FormOptions::default().preserve_on_unregister(true));
    let ctx = FormContext::root().with_form(form.clone());
    let email = FieldId::<String>::new("email");

    let mut binding = FieldBinding::attach_with(
        &ctx,
        FieldDefinition::new(&email)
            .initial_value(String::new())
            .label("Email")
            .hint("Work address")
            .required(true)
            .validator(not_empty),
    )
    .expect("attach");
    let (rebuilds, on_rebuild) = counter();
    binding
        .watch(&[FieldAspect::Validation, FieldAspect::Touched], on_rebuild)
        .expect("watch");

    assert_eq!(binding.label().expect("label").as_deref(), Some("Email"));
    assert_eq!(binding.hint().expect("hint").as_deref(), Some("Work address"));
    assert!(binding.is_required().expect("required"));

    binding.change("  ".to_owned()).expect("change");
    assert_eq!(binding.error_for_display().expect("display"), None);
    binding.blur().expect("blur");
    assert_eq!(
        binding.error_for_display().expect("display").as_deref(),
        Some("required")
    );
    assert_eq!(rebuilds.load(Ordering::SeqCst), 2);

    block_on(binding.change_async("ann@example.com".to_owned())).expect("change");
    assert_eq!(binding.value().expect("value").as_deref(), Some("ann@example.com"));
    assert_eq!(rebuilds.load(Ordering::SeqCst), 3);

    let second = FieldBinding::attach(&ctx, &email).expect("attach again");
    assert_eq!(second.value().expect("value").as_deref(), Some("ann@example.com"));
    drop(second);

    assert!(binding.detach().expect("detach"));
    assert_eq!(form.listener_count().expect("count"), 0);
    let again = FieldBinding::attach(&ctx, &email).expect("attach after detach");
    assert_eq!(again.value().expect("value").as_deref(), Some("ann@example.com"));
}

#[test]
fn options_parse_from_toml() {
    let options = FormOptions::from_toml_str(
        r#"
            autovalidate = "always"
            validator_fallback_message = "Nope"
            max_propagation_depth = 4
        "#,
    )
    .expect("parse");
    assert_eq!(options.autovalidate, AutovalidateMode::Always);
    assert_eq!(options.validator_fallback_message, "Nope");
    assert_eq!(options.max_propagation_depth, 4);
    assert!(!options.preserve_on_unregister);

    assert_eq!(FormOptions::from_toml_str("").expect("empty"), FormOptions::default());
    let clamped = FormOptions::from_toml_str("max_propagation_depth = 0").expect("zero depth");
    assert_eq!(clamped.max_propagation_depth, 1);
    let error = FormOptions::from_toml_str("autovalidate = \"sometimes\"").expect_err("bad mode");
    assert!(matches!(error, FormError::InvalidOptions(_)));
}

#[test]
fn field_path_helpers() {
    let city = FieldPath::from("address.city");
    assert_eq!(city.parent(), Some(FieldPath::from("address")));
    assert_eq!(city.segments().collect::<Vec<_>>(), vec!["address", "city"]);
    assert!(city.is_within(&FieldPath::from("address")));
    assert!(!FieldPath::from("addressee").is_within(&FieldPath::from("address")));
    assert_eq!(FieldPath::from("address").child("zip").as_str(), "address.zip");

    let address = FieldId::<String>::new("address");
    let zip: FieldId<String> = address.nested("zip");
    assert_eq!(zip.path().as_str(), "address.zip");
}

#[test]
fn form_values_group_by_prefix() {
    let form = FormController::default();
    let street = FieldId::<String>::new("address.street");
    let city = FieldId::<String>::new("address.city");
    let email = FieldId::<String>::new("email");
    for id in [&street, &city, &email] {
        form.register(FieldDefinition::new(id).initial_value(id.path().to_string()))
            .expect("register");
    }

    let address = form.values().expect("values").group(&FieldPath::from("address"));
    assert_eq!(address.len(), 2);
    assert_eq!(address.get(&city).as_deref(), Some("address.city"));
    assert!(!address.contains(email.path()));
}

#[test]
fn derive_macro_generates_typed_fields_and_schema() {
    let fields = Profile::fields();
    assert_eq!(fields.email().path().as_str(), "email");
    assert_eq!(fields.nickname().value_type(), std::any::type_name::<Option<String>>());

    let profile = Profile {
        email: "ann@example.com".to_owned(),
        age: 30,
        nickname: None,
    };
    let form = FormController::default();
    form.register_schema(&profile).expect("register schema");
    assert_eq!(form.model::<Profile>().expect("model"), Some(profile.clone()));

    form.set_value(&fields.age(), 31).expect("set age");
    form.set_value(&fields.nickname(), Some("annie".to_owned()))
        .expect("set nickname");
    let updated = Profile::from_values(&form.values().expect("values")).expect("complete model");
    assert_eq!(updated.age, 31);
    assert_eq!(updated.nickname.as_deref(), Some("annie"));
    assert!(form.is_form_dirty().expect("dirty"));
}
