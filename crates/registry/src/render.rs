//! Render-engine seam.
//!
//! Substitution syntax is caller-pluggable: a [`Renderer`] receives the
//! template and the supplied variables and produces the prompt text. The
//! default engine does `{{variable}}` replacement.

use std::collections::HashMap;

use promptforge_core::{Error, Result, TemplateVersion};

/// Turns a template version plus variables into prompt text.
pub trait Renderer: Send + Sync {
    /// Engine tag this renderer understands (matched against
    /// `TemplateVersion::engine`).
    fn engine(&self) -> &str;

    /// Render the template with the given variables.
    fn render(&self, version: &TemplateVersion, vars: &HashMap<String, String>) -> Result<String>;
}

/// Check that every required variable is present, in declaration order.
pub fn validate_variables(
    version: &TemplateVersion,
    vars: &HashMap<String, String>,
) -> Result<()> {
    for spec in &version.variables {
        if spec.required && !vars.contains_key(&spec.name) {
            return Err(Error::MissingVariable {
                name: spec.name.clone(),
            });
        }
    }
    Ok(())
}

/// Default engine: `{{name}}` placeholder substitution with declared
/// defaults filling in omitted optional variables.
pub struct SimpleRenderer;

impl Renderer for SimpleRenderer {
    fn engine(&self) -> &str {
        "simple"
    }

    fn render(&self, version: &TemplateVersion, vars: &HashMap<String, String>) -> Result<String> {
        if version.engine != self.engine() {
            return Err(Error::Render(format!(
                "engine mismatch: template wants '{}', renderer is '{}'",
                version.engine,
                self.engine()
            )));
        }
        validate_variables(version, vars)?;

        // Supplied values, then declared defaults for anything omitted.
        // Substitution order is fixed (declaration order, then extras by
        // key) so the output is a pure function of the inputs even when a
        // value itself contains a placeholder.
        let mut ordered: Vec<(&str, &str)> = Vec::new();
        for spec in &version.variables {
            if let Some(value) = vars.get(&spec.name) {
                ordered.push((spec.name.as_str(), value.as_str()));
            } else if let Some(default) = &spec.default_value {
                ordered.push((spec.name.as_str(), default.as_str()));
            }
        }
        // Undeclared extras still substitute; the schema only gates
        // required variables.
        let mut extras: Vec<(&str, &str)> = vars
            .iter()
            .filter(|(key, _)| !version.variables.iter().any(|spec| spec.name == **key))
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        extras.sort_by_key(|(key, _)| *key);
        ordered.extend(extras);

        let mut text = version.content.clone();
        for (key, value) in ordered {
            let placeholder = format!("{{{{{}}}}}", key);
            text = text.replace(&placeholder, value);
        }
        Ok(text)
    }
}
