pub mod buffer;
pub mod controller;
pub mod events;
pub mod machine;

pub use buffer::CandidateBuffer;
pub use controller::{CallController, CallHandle};
pub use events::CallNotice;
pub use machine::CallStateMachine;
