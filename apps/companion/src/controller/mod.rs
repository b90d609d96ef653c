//! Controller layer: the event funnel, the view state it feeds and the
//! command facade user intents go through.

pub mod events;
pub mod session;
