//! Device-side flow table model
//!
//! Mirrors how a forwarding device resolves rules: the highest-priority
//! matching rule wins, and installing a rule whose priority and match equal
//! an existing one replaces it.

use super::{FlowRule, PacketFields, RuleKey};

#[derive(Debug, Default)]
pub struct FlowTable {
    rules: Vec<FlowRule>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule, replacing one with identical priority and match
    pub fn install(&mut self, rule: FlowRule) {
        if let Some(existing) = self
            .rules
            .iter_mut()
            .find(|r| r.priority == rule.priority && r.matcher == rule.matcher)
        {
            *existing = rule;
        } else {
            self.rules.push(rule);
        }
    }

    /// Find the rule a device would apply to this frame
    ///
    /// Among equal-priority matches the earliest installed wins.
    pub fn lookup(&self, fields: &PacketFields) -> Option<&FlowRule> {
        self.rules
            .iter()
            .filter(|r| r.matcher.matches(fields))
            .fold(None, |best: Option<&FlowRule>, rule| match best {
                Some(b) if b.priority >= rule.priority => Some(b),
                _ => Some(rule),
            })
    }

    pub fn count_with_key(&self, key: RuleKey) -> usize {
        self.rules
            .iter()
            .filter(|r| r.rule_key == Some(key))
            .count()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Wipe all rules, as a device does when its session drops
    pub fn clear(&mut self) {
        self.rules.clear();
    }
}
