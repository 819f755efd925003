//! Asking the user whether the assistant may run a tool.
use std::collections::HashMap;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use tracing::debug;

use crate::cli::ux::{ChatMessageType, style_chat_text, truncate};

/// The user's answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    AllowAlways,
    Deny,
    DenyAlways,
}

impl Decision {
    /// Reads a typed answer. Anything unrecognised, including no answer, denies.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Decision::Allow,
            "always" => Decision::AllowAlways,
            "never" => Decision::DenyAlways,
            _ => Decision::Deny,
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow | Decision::AllowAlways)
    }

    /// True for answers that hold for every later request of the same tool.
    pub fn is_standing(self) -> bool {
        matches!(self, Decision::AllowAlways | Decision::DenyAlways)
    }
}

/// Asks the user to approve an action.
pub trait PermissionGate {
    fn request_permission(
        &mut self,
        action: &str,
        description: &str,
        details: Option<&str>,
    ) -> Result<Decision>;
}

/// Prompts on the terminal through a one-line editor.
#[derive(Default)]
pub struct TerminalGate {
    editor: Option<DefaultEditor>,
}

impl PermissionGate for TerminalGate {
    fn request_permission(
        &mut self,
        action: &str,
        description: &str,
        details: Option<&str>,
    ) -> Result<Decision> {
        println!();
        println!(
            "{}",
            style_chat_text(
                &format!("Permission requested: {action}"),
                ChatMessageType::Notice
            )
        );
        println!("   {description}");
        if let Some(details) = details {
            println!("{}", style_chat_text(details, ChatMessageType::Footer));
        }

        let editor = match self.editor.take() {
            Some(editor) => editor,
            None => DefaultEditor::new()?,
        };
        let editor = self.editor.insert(editor);
        let answer = match editor.readline("Allow? [y]es / [n]o / always / never: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => String::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Decision::from_answer(&answer))
    }
}

/// Standing `always`/`never` answers, per tool name.
///
/// The answers outlive `/clear` and last until the process exits.
#[derive(Debug, Default)]
pub struct PermissionPolicy {
    standing: HashMap<String, bool>,
}

impl PermissionPolicy {
    /// Decides whether `tool_name` may run, asking the gate unless a standing
    /// answer exists for the tool.
    pub fn resolve(
        &mut self,
        tool_name: &str,
        input: &Value,
        gate: &mut dyn PermissionGate,
    ) -> Result<bool> {
        if let Some(&allowed) = self.standing.get(tool_name) {
            debug!(tool_name, allowed, "Applying standing permission");
            return Ok(allowed);
        }

        let details = truncate(&input.to_string(), 200);
        let decision = gate.request_permission(
            tool_name,
            &describe_tool_use(tool_name, input),
            Some(&details),
        )?;
        debug!(tool_name, ?decision, "Permission answered");
        if decision.is_standing() {
            self.standing
                .insert(tool_name.to_string(), decision.is_allowed());
        }
        Ok(decision.is_allowed())
    }
}

fn describe_tool_use(tool_name: &str, input: &Value) -> String {
    let target = ["command", "file_path", "path", "url", "pattern"]
        .iter()
        .find_map(|key| input.get(key).and_then(Value::as_str));
    match target {
        Some(target) => format!("{tool_name}: {}", truncate(target, 100)),
        None => format!("The assistant wants to use {tool_name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::chat::test_utils::ScriptedGate;
    use serde_json::json;

    #[test]
    fn test_from_answer() {
        assert_eq!(Decision::from_answer("y"), Decision::Allow);
        assert_eq!(Decision::from_answer(" YES "), Decision::Allow);
        assert_eq!(Decision::from_answer("always"), Decision::AllowAlways);
        assert_eq!(Decision::from_answer("Never"), Decision::DenyAlways);
        assert_eq!(Decision::from_answer("n"), Decision::Deny);
        assert_eq!(Decision::from_answer(""), Decision::Deny);
        assert_eq!(Decision::from_answer("sure"), Decision::Deny);
    }

    #[test]
    fn test_one_shot_answers_ask_again() {
        let mut gate = ScriptedGate::new(&["y", "n"]);
        let mut policy = PermissionPolicy::default();
        let input = json!({"command": "ls"});

        assert!(policy.resolve("Bash", &input, &mut gate).unwrap());
        assert!(!policy.resolve("Bash", &input, &mut gate).unwrap());
        assert_eq!(gate.asked.len(), 2);
        assert_eq!(gate.asked[0].0, "Bash");
        assert_eq!(gate.asked[0].1, "Bash: ls");
    }

    #[test]
    fn test_standing_answers_are_cached_per_tool() {
        let mut gate = ScriptedGate::new(&["always", "never"]);
        let mut policy = PermissionPolicy::default();

        assert!(policy.resolve("Read", &json!({}), &mut gate).unwrap());
        assert!(!policy.resolve("Bash", &json!({}), &mut gate).unwrap());
        // Neither tool asks again.
        assert!(policy.resolve("Read", &json!({}), &mut gate).unwrap());
        assert!(!policy.resolve("Bash", &json!({}), &mut gate).unwrap());
        assert_eq!(gate.asked.len(), 2);
    }
}
