//! Event handlers behind the gateway: message sends, presence signals and
//! role/targeted advisories.

mod presence;
mod send;
mod signals;

pub use presence::{join_chat, leave_chat, mark_read, typing};
pub use send::{send_message, Delivery};
pub use signals::{notify, pong, role_signal, Notice, RoleSignal};
