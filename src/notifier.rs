// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use calloop::{
    timer::{TimeoutAction, Timer},
    InsertError, LoopHandle,
};
use indexmap::IndexSet;
use tracing::{debug, trace, warn};
use wayland_backend::server::{ClientId, GlobalId};
use wayland_protocols::ext::idle_notify::v1::server::{
    ext_idle_notification_v1::ExtIdleNotificationV1,
    ext_idle_notifier_v1::{self, ExtIdleNotifierV1},
};
use wayland_server::{
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource,
};

use crate::notification::IdleNotificationData;

/// Version of `ext_idle_notifier_v1` advertised to clients.
///
/// Version 2 adds `get_input_idle_notification` for notifications that
/// ignore idle inhibitors.
const NOTIFIER_VERSION: u32 = 2;

/// `wl_display.error.no_memory`. The display object is owned by the
/// backend, so no generated server binding exists to name the code by.
const NO_MEMORY: u32 = 2;

pub trait IdleNotifierHandler: Sized {
    fn idle_notifier_state(&mut self) -> &mut IdleNotifierState<Self>;
}

/// State of the `ext_idle_notifier_v1` global.
///
/// Owns every live manager binding and notification object, plus the
/// process-wide inhibition flag. Timers are scheduled on the event loop
/// behind `loop_handle`; each notification holds at most one pending
/// timer at a time.
pub struct IdleNotifierState<D> {
    global: GlobalId,
    is_inhibited: bool,
    pub(crate) loop_handle: LoopHandle<'static, D>,
    pub(crate) managers: IndexSet<ExtIdleNotifierV1>,
    pub(crate) notifications: IndexSet<ExtIdleNotificationV1>,
}

pub struct IdleNotifierGlobalData {
    filter: Box<dyn for<'a> Fn(&'a Client) -> bool + Send + Sync>,
}

impl<D> IdleNotifierState<D>
where
    D: GlobalDispatch<ExtIdleNotifierV1, IdleNotifierGlobalData>
        + Dispatch<ExtIdleNotifierV1, ()>
        + Dispatch<ExtIdleNotificationV1, IdleNotificationData>
        + IdleNotifierHandler
        + 'static,
{
    pub fn new<F>(
        dh: &DisplayHandle,
        loop_handle: LoopHandle<'static, D>,
        client_filter: F,
    ) -> IdleNotifierState<D>
    where
        F: for<'a> Fn(&'a Client) -> bool + Send + Sync + 'static,
    {
        let global = dh.create_global::<D, ExtIdleNotifierV1, _>(
            NOTIFIER_VERSION,
            IdleNotifierGlobalData {
                filter: Box::new(client_filter),
            },
        );

        IdleNotifierState {
            global,
            is_inhibited: false,
            loop_handle,
            managers: IndexSet::new(),
            notifications: IndexSet::new(),
        }
    }

    pub fn global_id(&self) -> GlobalId {
        self.global.clone()
    }

    pub fn is_inhibited(&self) -> bool {
        self.is_inhibited
    }

    /// Signal user activity to every live notification.
    ///
    /// Idled notifications get a `resumed` event; every notification has
    /// its countdown restarted, whether idled or not.
    pub fn notify_activity(&self) {
        for notification in &self.notifications {
            self.on_activity(notification);
        }
    }

    /// Update the global inhibition state.
    ///
    /// Inhibitor-obeying notifications are run through the activity path,
    /// resuming any that already idled and suspending (or rearming) their
    /// countdowns to match the new state. Notifications created through
    /// `get_input_idle_notification` are left untouched.
    pub fn set_is_inhibited(&mut self, inhibited: bool) {
        self.is_inhibited = inhibited;
        trace!(inhibited, "idle-notify inhibition changed");
        for notification in &self.notifications {
            let data = notification.data::<IdleNotificationData>().unwrap();
            if data.obeys_inhibitors() {
                self.on_activity(notification);
            }
        }
    }

    fn on_activity(&self, notification: &ExtIdleNotificationV1) {
        let data = notification.data::<IdleNotificationData>().unwrap();
        {
            let mut inner = data.inner.lock().unwrap();
            if inner.idled {
                notification.resumed();
            }
            inner.idled = false;
        }
        if let Err(err) = self.update_timer(notification) {
            warn!(?err, "failed to rearm idle-notification timer");
        }
    }

    /// (Re)arm the countdown for `notification`, replacing any pending
    /// timer. Inhibitor-obeying notifications stay unarmed while the
    /// inhibition flag is set.
    fn update_timer(
        &self,
        notification: &ExtIdleNotificationV1,
    ) -> Result<(), calloop::Error> {
        let data = notification.data::<IdleNotificationData>().unwrap();
        let mut inner = data.inner.lock().unwrap();

        if let Some(token) = inner.timer.take() {
            self.loop_handle.remove(token);
        }
        if self.is_inhibited && data.obeys_inhibitors() {
            return Ok(());
        }

        let resource = notification.clone();
        let token = self
            .loop_handle
            .insert_source(Timer::from_duration(data.timeout()), move |_, _, _| {
                let data = resource.data::<IdleNotificationData>().unwrap();
                let mut inner = data.inner.lock().unwrap();
                inner.timer = None;
                inner.idled = true;
                resource.idled();
                trace!(notification = ?resource, "idle-notification idled");
                TimeoutAction::Drop
            })
            .map_err(|InsertError { error, .. }| error)?;
        inner.timer = Some(token);
        Ok(())
    }

    /// Start tracking a freshly created notification, or reject it if
    /// its timer could not be allocated. A rejected notification never
    /// enters the live collection and its client is told there is no
    /// memory.
    fn track_notification(
        &mut self,
        manager: &ExtIdleNotifierV1,
        notification: ExtIdleNotificationV1,
        armed: Result<(), calloop::Error>,
    ) {
        match armed {
            Ok(()) => {
                let data = notification.data::<IdleNotificationData>().unwrap();
                debug!(
                    "registered idle-notification for {}ms",
                    data.timeout().as_millis()
                );
                self.notifications.insert(notification);
            }
            Err(err) => {
                warn!(?err, "failed to allocate idle-notification timer");
                manager.post_error(NO_MEMORY, "no memory");
            }
        }
    }
}

impl<D> GlobalDispatch<ExtIdleNotifierV1, IdleNotifierGlobalData, D> for IdleNotifierState<D>
where
    D: GlobalDispatch<ExtIdleNotifierV1, IdleNotifierGlobalData>
        + Dispatch<ExtIdleNotifierV1, ()>
        + Dispatch<ExtIdleNotificationV1, IdleNotificationData>
        + IdleNotifierHandler
        + 'static,
{
    fn bind(
        state: &mut D,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<ExtIdleNotifierV1>,
        _global_data: &IdleNotifierGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        let manager = data_init.init(resource, ());
        state.idle_notifier_state().managers.insert(manager);
    }

    fn can_view(client: Client, global_data: &IdleNotifierGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D> Dispatch<ExtIdleNotifierV1, (), D> for IdleNotifierState<D>
where
    D: GlobalDispatch<ExtIdleNotifierV1, IdleNotifierGlobalData>
        + Dispatch<ExtIdleNotifierV1, ()>
        + Dispatch<ExtIdleNotificationV1, IdleNotificationData>
        + IdleNotifierHandler
        + 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        manager: &ExtIdleNotifierV1,
        request: ext_idle_notifier_v1::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            ext_idle_notifier_v1::Request::GetIdleNotification {
                id,
                timeout,
                seat: _,
            } => {
                create_notification(state, data_init, manager, id, timeout, true);
            }
            ext_idle_notifier_v1::Request::GetInputIdleNotification {
                id,
                timeout,
                seat: _,
            } => {
                create_notification(state, data_init, manager, id, timeout, false);
            }
            // Destroying the manager leaves existing notifications active.
            ext_idle_notifier_v1::Request::Destroy => {}
            _ => unreachable!(),
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, manager: &ExtIdleNotifierV1, _data: &()) {
        state.idle_notifier_state().managers.swap_remove(manager);
    }
}

fn create_notification<D>(
    state: &mut D,
    data_init: &mut DataInit<'_, D>,
    manager: &ExtIdleNotifierV1,
    id: New<ExtIdleNotificationV1>,
    timeout: u32,
    obey_inhibitors: bool,
) where
    D: GlobalDispatch<ExtIdleNotifierV1, IdleNotifierGlobalData>
        + Dispatch<ExtIdleNotifierV1, ()>
        + Dispatch<ExtIdleNotificationV1, IdleNotificationData>
        + IdleNotifierHandler
        + 'static,
{
    let notification = data_init.init(
        id,
        IdleNotificationData::new(Duration::from_millis(u64::from(timeout)), obey_inhibitors),
    );

    let notifier = state.idle_notifier_state();
    let armed = notifier.update_timer(&notification);
    notifier.track_notification(manager, notification, armed);
}

#[macro_export]
macro_rules! delegate_idle_notify {
    ($(@<$( $lt:tt $( : $clt:tt $(+ $dlt:tt )* )? ),+>)? $ty: ty) => {
        $crate::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::reexports::wayland_protocols::ext::idle_notify::v1::server::ext_idle_notifier_v1::ExtIdleNotifierV1: $crate::notifier::IdleNotifierGlobalData
        ] => $crate::notifier::IdleNotifierState<$ty>);
        $crate::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::reexports::wayland_protocols::ext::idle_notify::v1::server::ext_idle_notifier_v1::ExtIdleNotifierV1: ()
        ] => $crate::notifier::IdleNotifierState<$ty>);
        $crate::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::reexports::wayland_protocols::ext::idle_notify::v1::server::ext_idle_notification_v1::ExtIdleNotificationV1: $crate::notification::IdleNotificationData
        ] => $crate::notifier::IdleNotifierState<$ty>);
    };
}
