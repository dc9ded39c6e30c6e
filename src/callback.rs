use crate::error::Error;
use std::sync::Arc;

/// Receives the outcome of folder pushing.
///
/// All calls for one [`ImapFolderPusher`](crate::ImapFolderPusher) come from its worker thread,
/// in order: one `on_push_event` as soon as the pusher starts (whether or not anything changed),
/// any number of further `on_push_event`s, and then at most one `on_push_error`, after which the
/// pusher is done.
pub trait PushCallback: Send + Sync {
    /// The folder may have changed and should be synchronized.
    fn on_push_event(&self, folder_server_id: &str);

    /// Pushing for the folder failed and has stopped. Restarting it is up to the receiver.
    fn on_push_error(&self, folder_server_id: &str, error: Error);
}

impl<T: PushCallback + ?Sized> PushCallback for Arc<T> {
    fn on_push_event(&self, folder_server_id: &str) {
        (**self).on_push_event(folder_server_id)
    }

    fn on_push_error(&self, folder_server_id: &str, error: Error) {
        (**self).on_push_error(folder_server_id, error)
    }
}
