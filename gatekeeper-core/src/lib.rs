pub mod custom_id;
pub mod handle;
pub mod ids;
pub mod recording;
pub mod render;
pub mod review;
pub mod state_machine;

pub use custom_id::{ControlId, ControlIdError};
pub use handle::{parse_handle, Handle};
pub use ids::*;
pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, Sanitizer, CORRELATION_ID_HEADER,
};
pub use render::{render_pending, render_terminal, Notification};
pub use review::{AlreadySettled, Decision, ReviewRequest, ReviewStatus};
