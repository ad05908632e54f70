//! Built-in task templates for `spawn_template`
//!
//! Each template expands a small set of inputs into a sub-task goal.

use handlebars::Handlebars;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::Params;

struct Template {
    name: &'static str,
    aliases: &'static [&'static str],
    body: &'static str,
    defaults: fn() -> Value,
}

const BUILD_TEST_FIX: &str = "Template BUILD-TEST-FIX: In project {{project_dir}}, build the project, run the tests, \
and iteratively fix failures until the tests pass. Prefer small, safe changes. Run: {{test_command}}.";

const VALIDATE_AND_FIX: &str = "Template VALIDATE-AND-FIX: For {{target}}: 1) run comprehensive validation using \
verify_result, 2) record every failure found, 3) fix each failure, 4) re-verify after each fix, 5) only mark done \
when all validations pass.";

const EXTENSION_TEST: &str = "Template EXTENSION-TEST: For the extension at {{extension_path}}: 1) verify it \
compiles (verify_result build), 2) exercise each command: {{#each commands}}{{#unless @first}}, {{/unless}}{{this}}{{/each}} \
using verify_result command, 3) fix any errors found, 4) repeat until all checks pass. Do not mark done until every \
verification passes.";

fn build_test_fix_defaults() -> Value {
    json!({"project_dir": ".", "test_command": "cargo test"})
}

fn validate_and_fix_defaults() -> Value {
    json!({"target": "project"})
}

fn extension_test_defaults() -> Value {
    json!({"extension_path": ".", "commands": ["build", "test"]})
}

const TEMPLATES: &[Template] = &[
    Template {
        name: "build_test_fix",
        aliases: &["build-test-fix", "build→test→fix"],
        body: BUILD_TEST_FIX,
        defaults: build_test_fix_defaults,
    },
    Template {
        name: "validate_and_fix",
        aliases: &["validate_fix"],
        body: VALIDATE_AND_FIX,
        defaults: validate_and_fix_defaults,
    },
    Template {
        name: "extension_test",
        aliases: &["vscode_extension_test", "vscode_test"],
        body: EXTENSION_TEST,
        defaults: extension_test_defaults,
    },
];

/// Renders template goals
pub struct TemplateCatalog {
    hbs: Handlebars<'static>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCatalog {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self { hbs }
    }

    /// Canonical names of the built-in templates
    pub fn names() -> Vec<&'static str> {
        TEMPLATES.iter().map(|t| t.name).collect()
    }

    /// Expand `template` with `inputs` into a goal sentence
    ///
    /// Unknown templates fall back to `inputs.goal`, then to a generic sentence.
    pub fn resolve_goal(&self, template: &str, inputs: &Params) -> String {
        debug!(%template, "TemplateCatalog::resolve_goal: called");
        let key = template.trim().to_lowercase();

        if let Some(found) = TEMPLATES.iter().find(|t| t.name == key || t.aliases.contains(&key.as_str())) {
            let mut data = (found.defaults)();
            if let Value::Object(map) = &mut data {
                for (k, v) in inputs {
                    if !v.is_null() {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            match self.hbs.render_template(found.body, &data) {
                Ok(goal) => return goal,
                Err(e) => warn!(template = found.name, error = %e, "TemplateCatalog::resolve_goal: render failed"),
            }
        }

        if let Some(goal) = inputs.get("goal").and_then(Value::as_str).filter(|g| !g.trim().is_empty()) {
            debug!("TemplateCatalog::resolve_goal: using inputs.goal");
            return goal.to_string();
        }

        let inputs_json: String = Value::Object(inputs.clone()).to_string().chars().take(200).collect();
        format!("Apply template {} with inputs {}", template, inputs_json)
    }
}
