//! Decision state machine for a single review request.
//!
//! Same split as the rest of the bot's I/O handling:
//! - **State**: the request plus the step in flight (`ReviewMachine`)
//! - **Events**: what happened (`Event`)
//! - **Effects**: what to do (`Effect`)
//! - **Transition**: pure function `(State, Event) -> (State, Vec<Effect>)`
//!
//! The server's interpreter runs effects against Discord and feeds the
//! resulting events back in until no effects remain.

pub mod effect;
pub mod event;
pub mod state;
pub mod transition;

pub use effect::*;
pub use event::*;
pub use state::*;
pub use transition::*;
