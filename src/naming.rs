//! Naming rule: renders an instance's DNS name from a template.
//!
//! Templates use minijinja syntax with strict undefined handling. The
//! context is the [`Instance`] itself:
//!
//! | variable     | value                                   |
//! |--------------|-----------------------------------------|
//! | `name`       | instance name                           |
//! | `ip`         | primary private address                 |
//! | `zone`       | zone short name (`us-central1-a`)       |
//! | `project`    | owning project                          |
//! | `network`    | network URL                             |
//! | `subnetwork` | subnetwork URL                          |
//! | `labels`     | label map (`labels.env`)                |
//!
//! Helpers: `label("key")` plus the built-in filters (`lower`, `upper`,
//! `replace`, `trim`, ...).
//!
//! Referencing anything that is not set, including an absent label, is a
//! render error. The refresh cycle that hit it fails as a whole.
//!
//! ```text
//! {{ name }}.example.org.              -> web-1.example.org.
//! {{ label("dns") }}.example.org.      -> testing.example.org.
//! {{ name }}.{{ zone }}.internal.      -> web-1.us-central1-a.internal.
//! ```

use minijinja::{Environment, Error, ErrorKind, State, UndefinedBehavior};
use std::fmt;

use crate::inventory::Instance;

const TEMPLATE_NAME: &str = "instance";

/// Compiled naming template, shared read-only by every refresh cycle.
pub struct NamingRule {
    env: Environment<'static>,
    source: String,
}

impl NamingRule {
    /// Compile `source`. Syntax errors surface here, at configuration time.
    pub fn parse(source: &str) -> Result<Self, Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_function("label", label);
        env.add_template_owned(TEMPLATE_NAME, source.to_string())?;

        Ok(Self {
            env,
            source: source.to_string(),
        })
    }

    /// Template text as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the name for one instance, surrounding whitespace trimmed.
    pub fn render(&self, instance: &Instance) -> Result<String, Error> {
        let template = self.env.get_template(TEMPLATE_NAME)?;
        let rendered = template.render(instance)?;
        Ok(rendered.trim().to_string())
    }
}

impl fmt::Debug for NamingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingRule")
            .field("source", &self.source)
            .finish()
    }
}

/// `label("key")`: value of a label, error if unset.
fn label(state: &State, key: &str) -> Result<String, Error> {
    let labels = state
        .lookup("labels")
        .ok_or_else(|| Error::new(ErrorKind::UndefinedError, "instance has no labels"))?;
    let value = labels.get_attr(key)?;
    if value.is_undefined() || value.is_none() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            format!("label {key:?} is not set"),
        ));
    }
    Ok(value.to_string())
}
