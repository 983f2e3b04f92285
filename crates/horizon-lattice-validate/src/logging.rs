//! Logging and debugging facilities for the validation engine.
//!
//! This module provides:
//! - Target names for filtering the engine's `tracing` output
//! - [`NodeTreeDebug`], a readable dump of a published [`NodeState`] tree
//!
//! # Tracing Integration
//!
//! The engine emits `trace!` events for evaluations and notifications and
//! `debug!` events for activation and structural changes. Install any
//! `tracing` subscriber to see them:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_lattice_validate::group=debug")
//!     .init();
//! ```
//!
//! # Debug Visualization
//!
//! ```ignore
//! use horizon_lattice_validate::logging::NodeTreeDebug;
//!
//! println!("{}", NodeTreeDebug::new().format(&form.state()));
//! ```

use std::fmt::Write as FmtWrite;

use crate::state::NodeState;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate root target.
    pub const ROOT: &str = "horizon_lattice_validate";
    /// Observable stores.
    pub const STORE: &str = "horizon_lattice_validate::store";
    /// Dependency aggregators.
    pub const AGGREGATE: &str = "horizon_lattice_validate::aggregate";
    /// Predicate validator nodes.
    pub const FIELD: &str = "horizon_lattice_validate::field";
    /// Collection validator nodes.
    pub const GROUP: &str = "horizon_lattice_validate::group";
    /// Predicate library installation.
    pub const LIBRARY: &str = "horizon_lattice_validate::library";
    /// Async driver spawning.
    pub const RUNTIME: &str = "horizon_lattice_validate::runtime";
}

/// Style options for state tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for state tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show node values.
    pub show_values: bool,
    /// Whether to show failure reasons.
    pub show_errors: bool,
    /// Whether to list the own-predicate entry (`_`) of collection nodes.
    pub show_own: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_values: false,
            show_errors: true,
            show_own: false,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for detailed debugging output.
    pub fn detailed() -> Self {
        Self {
            show_values: true,
            show_own: true,
            ..Default::default()
        }
    }

    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_values: false,
            show_errors: false,
            show_own: false,
            ..Default::default()
        }
    }
}

/// Debug utility for visualizing node state trees.
#[derive(Debug, Clone, Default)]
pub struct NodeTreeDebug {
    options: TreeFormatOptions,
}

impl NodeTreeDebug {
    /// Create a new debug visualizer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a debug visualizer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format a state and everything below it.
    pub fn format(&self, state: &NodeState) -> String {
        let mut output = String::new();
        self.format_into(state, 0, true, &mut output);
        output
    }

    fn format_into(&self, state: &NodeState, depth: usize, is_last: bool, output: &mut String) {
        if self.options.max_depth.is_some_and(|max| depth > max) {
            return;
        }

        output.push_str(&self.build_prefix(depth, is_last));
        output.push_str(if state.id.as_str().is_empty() {
            "(root)"
        } else {
            state.id.as_str()
        });
        let _ = write!(output, " [{}]", flags(state));

        if self.options.show_values {
            match &state.value {
                Some(value) => {
                    let _ = write!(output, " = {value}");
                }
                None => output.push_str(" = undefined"),
            }
        }
        if self.options.show_errors {
            if let Some(error) = &state.error {
                let _ = write!(output, " ! {error}");
            }
        }

        if self.options.style == TreeStyle::Compact {
            output.push(' ');
        } else {
            output.push('\n');
        }

        let Some(group) = &state.group else {
            return;
        };
        let children: Vec<_> = group
            .details
            .iter()
            .filter(|(id, _)| self.options.show_own || id.as_str() != "_")
            .collect();
        let count = children.len();
        for (index, (_, child)) in children.into_iter().enumerate() {
            self.format_into(child, depth + 1, index + 1 == count, output);
        }
    }

    /// Build the prefix string for a tree node.
    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }

        let (branch, corner, last) = match self.options.style {
            TreeStyle::Ascii => ("|", "+--", "`--"),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            TreeStyle::Compact => return "- ".to_string(),
        };

        let mut prefix = String::new();
        for _ in 0..(depth - 1) {
            prefix.push_str(branch);
            prefix.push_str(&" ".repeat(self.options.indent_size));
        }
        prefix.push_str(if is_last { last } else { corner });
        prefix.push(' ');
        prefix
    }
}

fn flags(state: &NodeState) -> String {
    let mut parts = Vec::with_capacity(4);
    parts.push(match state.active {
        Some(true) => "active",
        Some(false) => "inactive",
        None => "mixed",
    });
    if state.validating {
        parts.push("validating");
    } else if state.valid {
        parts.push("valid");
    } else {
        parts.push("invalid");
    }
    if state.changed {
        parts.push("changed");
    }
    parts.join(", ")
}
