//
// placeholders.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::collections::BTreeMap;

/// The kernel directory; substituted when a kernelspec is discovered.
pub const RESOURCE_DIR: &str = "resource_dir";

/// The kernel's unique id; substituted at launch.
pub const KERNEL_ID: &str = "kernel_id";

/// The `host:port` on which the launcher reports connection info.
pub const RESPONSE_ADDRESS: &str = "response_address";

/// The `lower..upper` port range the launcher may bind within.
pub const PORT_RANGE: &str = "port_range";

/// A set of `{name}` placeholder values.
///
/// Substitution is a single left-to-right pass: replaced text is never
/// rescanned, and `{name}` tokens with no value are left as they are. Values
/// that contain no placeholder tokens therefore make substitution idempotent.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the value for `name`.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replaces every known `{name}` token in `template`.
    pub fn apply(&self, template: &str) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            result.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];
            match after_open.find(['{', '}']) {
                Some(close) if after_open.as_bytes()[close] == b'}' => {
                    let name = &after_open[..close];
                    match self.values.get(name) {
                        Some(value) => result.push_str(value),
                        None => {
                            result.push('{');
                            result.push_str(name);
                            result.push('}');
                        }
                    }
                    rest = &after_open[close + 1..];
                }
                _ => {
                    // A lone or nested brace; emit it and keep scanning after it
                    result.push('{');
                    rest = after_open;
                }
            }
        }
        result.push_str(rest);
        result
    }
}
