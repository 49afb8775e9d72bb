use crate::errors::{ErrorInfo, ProbeError};
use crate::store::{RecordStore, DONE_FIELD};
use crate::value::Value;

/// Fails unless `aspect` has a report marked `done: true`.
pub fn check_dep(store: &RecordStore, aspect: &str) -> Result<(), ProbeError> {
    let Some(report) = store.aspect_report(aspect) else {
        return Err(ProbeError::Dependency(
            ErrorInfo::new("dep_missing", "dependency has no report")
                .with_context("aspect", aspect)
                .with_hint("run the dependency first or drop it from the forced set"),
        ));
    };
    match report.get(DONE_FIELD).and_then(Value::as_bool) {
        Some(true) => Ok(()),
        _ => Err(ProbeError::Dependency(
            ErrorInfo::new("dep_incomplete", "dependency is not marked done")
                .with_context("aspect", aspect)
                .with_hint("a previous run of the dependency did not finish"),
        )),
    }
}

/// Checks every dependency, reporting the first one that is not satisfied.
pub fn check_deps<'a>(
    store: &RecordStore,
    deps: impl IntoIterator<Item = &'a str>,
) -> Result<(), ProbeError> {
    deps.into_iter().try_for_each(|dep| check_dep(store, dep))
}
