extern crate imap_push;

use imap_push::{
    Error, ImapFolderPusher, ImapStoreBuilder, NoopPowerManager, PushCallback,
    DEFAULT_IDLE_REFRESH_TIMEOUT,
};
use std::env;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

struct Printer {
    failed: Mutex<mpsc::Sender<()>>,
}

impl PushCallback for Printer {
    fn on_push_event(&self, folder: &str) {
        println!("{} may have changed, time to synchronize it", folder);
    }

    fn on_push_error(&self, folder: &str, error: Error) {
        eprintln!("pushing {} failed: {}", folder, error);
        let _ = self.failed.lock().map(|failed| failed.send(()));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = env::var("IMAP_SERVER")?;
    let port = env::var("IMAP_PORT").unwrap_or_else(|_| String::from("993"));
    let port = port.parse()?;

    let username = env::var("IMAP_USER")?;
    let password = env::var("IMAP_PASSWORD")?;
    let folder = env::var("IMAP_FOLDER").unwrap_or_else(|_| String::from("INBOX"));

    // how long to watch the folder for, in seconds
    let duration = env::var("IMAP_PUSH_DURATION").unwrap_or_else(|_| String::from("300"));
    let duration = Duration::from_secs(duration.parse()?);

    let store = ImapStoreBuilder::new(server, port)
        .credentials(username.clone(), password)
        .connect_timeout(Duration::from_secs(10))
        .debug(true)
        .build();

    let (failed_tx, failed_rx) = mpsc::channel();
    let pusher = ImapFolderPusher::new(
        Arc::new(store),
        Arc::new(NoopPowerManager),
        Arc::new(Printer {
            failed: Mutex::new(failed_tx),
        }),
        username,
        folder,
        DEFAULT_IDLE_REFRESH_TIMEOUT,
    );
    pusher.start()?;

    if failed_rx.recv_timeout(duration).is_err() {
        println!("done watching {}", pusher.folder_server_id());
    }

    pusher.stop();
    pusher.join();
    Ok(())
}
