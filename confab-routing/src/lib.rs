//! CONFAB Routing - Addressing and Turn Control
//!
//! Pure policy functions: the mention scanner that decides which identities a
//! message addresses, the eligibility rules that pick responding agents, and
//! the reply rewrite pipeline plus turn accounting that keep agents from
//! mentioning each other into unbounded cycles.

mod mentions;
mod turns;

pub use mentions::{
    extract_all_mentions, extract_paragraph_mentions, response_decision, should_respond,
    starts_with_mention, ResponseDecision,
};
pub use turns::{
    add_auto_mention, prepare_agent_reply, remove_self_mentions, ReplyRewrite, TurnCounter,
};
