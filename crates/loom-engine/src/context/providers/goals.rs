use async_trait::async_trait;
use serde_json::Value;

use loom_core::{Goal, ProviderError};

use crate::context::provider::{decode, ContextProvider, ProviderContext, Rendered};

/// Goals, one bullet each. Collection uses the default snapshot passthrough.
pub struct GoalsProvider;

#[async_trait]
impl ContextProvider for GoalsProvider {
    fn id(&self) -> &str {
        "goals"
    }

    async fn format(&self, value: Value, _ctx: &ProviderContext) -> Result<Rendered, ProviderError> {
        let goals: Vec<Goal> = decode(value)?;
        Ok(Rendered::Lines(goals.iter().map(render_goal).collect()))
    }
}

fn render_goal(goal: &Goal) -> String {
    let mut line = format!("- **{}** ({})", goal.heading, goal.identifier);
    if !goal.content.trim().is_empty() {
        line.push_str(&format!(": {}", goal.content.trim()));
    }
    if let Some(notes) = goal.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        line.push_str(&format!("\n  Notes: {}", notes.trim()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::providers::test_support::{ctx, render};
    use crate::context::snapshot::SnapshotData;

    #[tokio::test]
    async fn renders_goal_bullets() {
        let mut goal = Goal::new("g1", "Ship report").with_content("by Friday");
        goal.notes = Some("ask finance".into());
        let ctx = ctx(SnapshotData {
            goals: vec![goal, Goal::new("g2", "Tidy up")],
            ..Default::default()
        });
        let out = render(&GoalsProvider, &ctx).await;
        assert_eq!(
            out,
            "- **Ship report** (g1): by Friday\n  Notes: ask finance\n- **Tidy up** (g2)"
        );
    }

    #[tokio::test]
    async fn no_goals_renders_empty() {
        let ctx = ctx(SnapshotData::default());
        assert_eq!(render(&GoalsProvider, &ctx).await, "");
    }
}
