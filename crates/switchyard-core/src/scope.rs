/// Separator between the target and model parts of a scope key
pub const SCOPE_SEPARATOR: &str = "::";

/// Build a circuit breaker scope key
///
/// A bare target id tracks the whole upstream; `target::model` tracks one
/// model hosted by it. The two forms never share breaker state.
pub fn scope_key(target: &str, model: Option<&str>) -> String {
    match model {
        Some(model) if !model.is_empty() => format!("{target}{SCOPE_SEPARATOR}{model}"),
        _ => target.to_owned(),
    }
}
