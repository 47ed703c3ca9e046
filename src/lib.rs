// SPDX-License-Identifier: GPL-3.0-only

//! Server-side implementation of the `ext-idle-notify-v1` Wayland protocol.
//!
//! Clients register notifications with a timeout; the compositor sends
//! `idled` once the session has seen no activity for that long, and
//! `resumed` when activity comes back. The compositor feeds activity and
//! idle-inhibition changes into [`IdleNotifierState`] through
//! [`IdleNotifierState::notify_activity`] and
//! [`IdleNotifierState::set_is_inhibited`]; timers run on the calloop
//! event loop the state was created with.
//!
//! Embedders implement [`IdleNotifierHandler`] on their compositor state
//! and invoke [`delegate_idle_notify`] for it.

pub mod notification;
pub mod notifier;

pub use notification::IdleNotificationData;
pub use notifier::{IdleNotifierGlobalData, IdleNotifierHandler, IdleNotifierState};

pub mod reexports {
    pub use calloop;
    pub use wayland_protocols;
    pub use wayland_server;
}
