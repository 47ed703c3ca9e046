// SPDX-License-Identifier: GPL-3.0-only

use std::{sync::Mutex, time::Duration};

use calloop::RegistrationToken;
use wayland_backend::server::ClientId;
use wayland_protocols::ext::idle_notify::v1::server::ext_idle_notification_v1::{
    self, ExtIdleNotificationV1,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle};

use crate::notifier::{IdleNotifierHandler, IdleNotifierState};

/// User data attached to every `ext_idle_notification_v1` resource.
pub struct IdleNotificationData {
    timeout: Duration,
    obey_inhibitors: bool,
    pub(crate) inner: Mutex<IdleNotificationInner>,
}

#[derive(Debug, Default)]
pub(crate) struct IdleNotificationInner {
    pub(crate) idled: bool,
    pub(crate) timer: Option<RegistrationToken>,
}

impl IdleNotificationData {
    pub(crate) fn new(timeout: Duration, obey_inhibitors: bool) -> IdleNotificationData {
        IdleNotificationData {
            timeout,
            obey_inhibitors,
            inner: Mutex::new(IdleNotificationInner::default()),
        }
    }

    /// Timeout this notification was created with. A zero timeout fires
    /// on the next event loop dispatch.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether an active idle inhibitor suspends this notification's
    /// countdown. `false` for notifications created through
    /// `get_input_idle_notification`.
    pub fn obeys_inhibitors(&self) -> bool {
        self.obey_inhibitors
    }

    /// Whether the timeout elapsed without activity since the last
    /// `idled` event, if any.
    pub fn is_idled(&self) -> bool {
        self.inner.lock().unwrap().idled
    }
}

impl<D> Dispatch<ExtIdleNotificationV1, IdleNotificationData, D> for IdleNotifierState<D>
where
    D: Dispatch<ExtIdleNotificationV1, IdleNotificationData> + IdleNotifierHandler + 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _notification: &ExtIdleNotificationV1,
        request: ext_idle_notification_v1::Request,
        _data: &IdleNotificationData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            ext_idle_notification_v1::Request::Destroy => {}
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        notification: &ExtIdleNotificationV1,
        data: &IdleNotificationData,
    ) {
        let notifier = state.idle_notifier_state();
        // Cancel synchronously, the timer must never outlive the resource.
        if let Some(token) = data.inner.lock().unwrap().timer.take() {
            notifier.loop_handle.remove(token);
        }
        notifier.notifications.swap_remove(notification);
    }
}
