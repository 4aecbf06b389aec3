//! State machine module.

pub mod event;
pub mod guard;
pub mod handlers;
pub mod machine;

pub use event::{EventSink, SessionEvent};
pub use guard::{PendingRequest, RequestGuard};
pub use handlers::{HandleResult, HandlerContext, apply, dispatch};
pub use machine::{
    OtaState, SessionMode, StateMachineContext, SubState, TimeoutHandle, TimeoutPolicy,
    TimerStats, TransferTracker,
};
