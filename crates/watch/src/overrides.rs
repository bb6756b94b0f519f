//! Interactive keyboard overrides for the watch loop.

use std::io::IsTerminal;

/// A single keystroke decoded into an action. Keybindings: `r` force-rerun
/// last targets, `a` run-all, `f` run-previously-failed, `q` quit, `h`/`?`
/// help, `p` project filter, `t` test-name substring filter, `c` trait
/// (category) filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideAction {
    ForceRerunLast,
    RunAll,
    RunPreviouslyFailed,
    Quit,
    Help,
    FilterByProject(String),
    FilterByTestName(String),
    FilterByTrait(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    Project,
    TestName,
    Trait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOrAction {
    Action(OverrideAction),
    OpenMenu(Menu),
}

/// Decode one keystroke into the action it performs directly, or the
/// follow-up menu it opens (the three filter menus need a second line of
/// input, which the keyboard reader collects before constructing the
/// matching `OverrideAction::FilterBy*`). Unrecognized characters are
/// `None`; callers just ignore them.
pub fn decode_key(c: char) -> Option<MenuOrAction> {
    match c {
        'r' | 'R' => Some(MenuOrAction::Action(OverrideAction::ForceRerunLast)),
        'a' | 'A' => Some(MenuOrAction::Action(OverrideAction::RunAll)),
        'f' | 'F' => Some(MenuOrAction::Action(OverrideAction::RunPreviouslyFailed)),
        'q' | 'Q' => Some(MenuOrAction::Action(OverrideAction::Quit)),
        'h' | 'H' | '?' => Some(MenuOrAction::Action(OverrideAction::Help)),
        'p' | 'P' => Some(MenuOrAction::OpenMenu(Menu::Project)),
        't' | 'T' => Some(MenuOrAction::OpenMenu(Menu::TestName)),
        'c' | 'C' => Some(MenuOrAction::OpenMenu(Menu::Trait)),
        _ => None,
    }
}

/// Accumulated override state across watch cycles: filters
/// persist until explicitly cleared by `run-all` or replaced by a later
/// override of the same kind.
#[derive(Debug, Default, Clone)]
pub struct OverrideStack {
    pub project_filter: Option<String>,
    pub test_name_filter: Option<String>,
    pub trait_filters: Vec<String>,
    pub rerun_last_requested: bool,
    pub replay_failed_requested: bool,
}

impl OverrideStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, action: OverrideAction) {
        match action {
            OverrideAction::ForceRerunLast => self.rerun_last_requested = true,
            OverrideAction::RunPreviouslyFailed => self.replay_failed_requested = true,
            OverrideAction::RunAll => {
                self.project_filter = None;
                self.test_name_filter = None;
                self.trait_filters.clear();
                self.rerun_last_requested = false;
                self.replay_failed_requested = false;
            }
            OverrideAction::FilterByProject(name) => self.project_filter = Some(name),
            OverrideAction::FilterByTestName(substr) => self.test_name_filter = Some(substr),
            OverrideAction::FilterByTrait(expr) => self.push_trait_filter(expr),
            OverrideAction::Quit | OverrideAction::Help => {}
        }
    }

    /// Adding `Category=X` drops any existing `Category!=X` already on the
    /// stack: overrides replace rather than conjoin, to avoid mutually
    /// exclusive filters.
    fn push_trait_filter(&mut self, expr: String) {
        if let Some((category, true)) = parse_category(&expr) {
            self.trait_filters
                .retain(|existing| !is_negated_category(existing, &category));
        }
        self.trait_filters.push(expr);
    }

    /// Render the accumulated trait filters as a single `dotnet test`
    /// filter expression, AND-joined.
    pub fn trait_filter_expression(&self) -> Option<String> {
        if self.trait_filters.is_empty() {
            return None;
        }
        Some(
            self.trait_filters
                .iter()
                .map(|f| format!("({f})"))
                .collect::<Vec<_>>()
                .join(" & "),
        )
    }
}

/// Parses `Category=X` / `Category!=X`, returning `(X, is_positive)`.
fn parse_category(expr: &str) -> Option<(String, bool)> {
    if let Some(name) = expr.strip_prefix("Category=") {
        Some((name.to_string(), true))
    } else {
        expr.strip_prefix("Category!=").map(|name| (name.to_string(), false))
    }
}

fn is_negated_category(existing: &str, category: &str) -> bool {
    existing == format!("Category!={category}")
}

/// Whether the interactive keyboard reader should be started at all:
/// only when standard input is a terminal.
pub fn should_read_keyboard() -> bool {
    std::io::stdin().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_all_clears_every_filter() {
        let mut stack = OverrideStack::new();
        stack.apply(OverrideAction::FilterByProject("Core".to_string()));
        stack.apply(OverrideAction::RunAll);
        assert!(stack.project_filter.is_none());
    }

    #[test]
    fn positive_trait_filter_replaces_negated_counterpart() {
        let mut stack = OverrideStack::new();
        stack.apply(OverrideAction::FilterByTrait("Category!=Slow".to_string()));
        stack.apply(OverrideAction::FilterByTrait("Category=Slow".to_string()));
        assert_eq!(stack.trait_filters, vec!["Category=Slow".to_string()]);
    }

    #[test]
    fn unrelated_trait_filters_accumulate() {
        let mut stack = OverrideStack::new();
        stack.apply(OverrideAction::FilterByTrait("Category=Fast".to_string()));
        stack.apply(OverrideAction::FilterByTrait("Priority=High".to_string()));
        assert_eq!(stack.trait_filters.len(), 2);
        assert_eq!(
            stack.trait_filter_expression().unwrap(),
            "(Category=Fast) & (Priority=High)"
        );
    }

    #[test]
    fn decode_key_maps_known_keys() {
        assert_eq!(decode_key('q'), Some(MenuOrAction::Action(OverrideAction::Quit)));
        assert_eq!(decode_key('p'), Some(MenuOrAction::OpenMenu(Menu::Project)));
        assert_eq!(decode_key('z'), None);
    }
}
