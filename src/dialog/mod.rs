pub mod surface;

use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ShareError;
pub use surface::{ChannelSurface, PromptSurface, SurfaceEvent, SurfaceHandle};

/// Set of responses a prompt offers to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options(u8);

impl Options {
    pub const NONE: Options = Options(0);
    pub const CONFIRM: Options = Options(1 << 0);
    pub const CANCEL: Options = Options(1 << 1);
    pub const BOTH: Options = Options(1 << 0 | 1 << 1);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether this set allows the given outcome.
    pub fn allows(self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Confirm => self.0 & Self::CONFIRM.0 != 0,
            Outcome::Cancel => self.0 & Self::CANCEL.0 != 0,
            Outcome::None => false,
        }
    }
}

/// Resolution of a prompt. `None` only ever signals a malformed request
/// (empty allowed-response set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    None,
    Confirm,
    Cancel,
}

/// One queued prompt. Consumed exactly once by the processing loop.
struct Request {
    text: String,
    options: Options,
    done: oneshot::Sender<Outcome>,
    token: CancellationToken,
}

/// Serializes confirm/cancel prompts from any caller through one shared
/// prompt surface. At most one request is displayed at any instant;
/// requests resolve in submission order.
#[derive(Clone)]
pub struct Dialog {
    queue: mpsc::UnboundedSender<Request>,
}

impl Dialog {
    /// Spawn the prompt processing loop over the given surface. The loop
    /// exits when `shutdown` fires or every `Dialog` handle is dropped.
    pub fn spawn(surface: impl PromptSurface + 'static, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(process_requests(rx, Box::new(surface), shutdown));
        Self { queue: tx }
    }

    /// Display a prompt and suspend until the user resolves it or `token`
    /// cancels. An empty `options` set is rejected immediately with
    /// `Outcome::None`; cancellation surfaces as `Err(Cancelled)`.
    pub async fn show(
        &self,
        text: impl Into<String>,
        options: Options,
        token: &CancellationToken,
    ) -> Result<Outcome, ShareError> {
        if options.is_empty() {
            error!("Prompt submitted with no allowed responses.");
            return Ok(Outcome::None);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let request = Request {
            text: text.into(),
            options,
            done: done_tx,
            token: token.clone(),
        };
        self.queue
            .send(request)
            .map_err(|_| ShareError::Cancelled)?;

        debug!("Prompt queued, awaiting resolution.");
        tokio::select! {
            _ = token.cancelled() => Err(ShareError::Cancelled),
            resolved = done_rx => resolved.map_err(|_| ShareError::Cancelled),
        }
    }
}

/// The single consuming loop. Pulls the next request only once no request
/// is being displayed; the surface is hidden unconditionally after every
/// display, whichever way it ended.
async fn process_requests(
    mut queue: mpsc::UnboundedReceiver<Request>,
    mut surface: Box<dyn PromptSurface>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        // A request cancelled while queued never consumes a display slot.
        // Dropping its completion channel resolves the submitter.
        if request.token.is_cancelled() {
            debug!("Dropping prompt cancelled before display.");
            continue;
        }

        surface.show(&request.text, request.options).await;
        info!("Displaying prompt: {}", request.text);

        let resolved = tokio::select! {
            choice = read_allowed(surface.as_mut(), request.options) => choice,
            _ = request.token.cancelled() => None,
            _ = shutdown.cancelled() => None,
        };

        surface.hide().await;

        match resolved {
            Some(outcome) => {
                debug!("Prompt resolved: {:?}", outcome);
                // Exactly-once delivery; a submitter that already gave up
                // cancelling simply drops the receiver.
                let _ = request.done.send(outcome);
            }
            None => debug!("Prompt ended without a response."),
        }

        if shutdown.is_cancelled() {
            break;
        }
    }

    debug!("Prompt processing loop stopped.");
}

/// Wait for a surface response that is actually in the allowed set.
async fn read_allowed(surface: &mut dyn PromptSurface, options: Options) -> Option<Outcome> {
    loop {
        match surface.read_choice().await {
            Some(choice) if options.allows(choice) => return Some(choice),
            Some(choice) => debug!("Ignoring response {:?} not offered by this prompt.", choice),
            None => return None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn spawn_dialog() -> (Dialog, SurfaceHandle) {
        let (surface, handle) = ChannelSurface::new();
        let dialog = Dialog::spawn(surface, CancellationToken::new());
        (dialog, handle)
    }

    #[tokio::test]
    async fn empty_options_resolve_none_without_display() {
        let (dialog, mut handle) = spawn_dialog();
        let token = CancellationToken::new();

        let outcome = dialog.show("malformed", Options::NONE, &token).await.unwrap();
        assert_eq!(outcome, Outcome::None);

        // Nothing may have reached the surface.
        assert!(handle.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn requests_display_in_submission_order() {
        let (dialog, mut handle) = spawn_dialog();
        let token = CancellationToken::new();

        let mut pending = Vec::new();
        for i in 0..3 {
            let dialog = dialog.clone();
            let token = token.clone();
            pending.push(tokio::spawn(async move {
                dialog
                    .show(format!("prompt {}", i), Options::CONFIRM, &token)
                    .await
            }));
            // Give each submission time to enqueue so order is defined.
            tokio::task::yield_now().await;
        }

        for i in 0..3 {
            match handle.events.recv().await.unwrap() {
                SurfaceEvent::Show { text, .. } => assert_eq!(text, format!("prompt {}", i)),
                other => panic!("unexpected event {:?}", other),
            }
            handle.choices.send(Outcome::Confirm).unwrap();
            assert_eq!(handle.events.recv().await.unwrap(), SurfaceEvent::Hide);
        }

        for task in pending {
            assert_eq!(task.await.unwrap().unwrap(), Outcome::Confirm);
        }
    }

    #[tokio::test]
    async fn cancelled_before_display_never_shows() {
        let (dialog, mut handle) = spawn_dialog();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let live = CancellationToken::new();

        let first = {
            let dialog = dialog.clone();
            let cancelled = cancelled.clone();
            tokio::spawn(async move { dialog.show("dead", Options::CONFIRM, &cancelled).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let dialog = dialog.clone();
            let live = live.clone();
            tokio::spawn(async move { dialog.show("alive", Options::CONFIRM, &live).await })
        };

        // Only the second request reaches the surface.
        match handle.events.recv().await.unwrap() {
            SurfaceEvent::Show { text, .. } => assert_eq!(text, "alive"),
            other => panic!("unexpected event {:?}", other),
        }
        handle.choices.send(Outcome::Confirm).unwrap();

        assert!(matches!(
            first.await.unwrap(),
            Err(ShareError::Cancelled)
        ));
        assert_eq!(second.await.unwrap().unwrap(), Outcome::Confirm);
    }

    #[tokio::test]
    async fn cancelling_displayed_request_hides_and_resolves_once() {
        let (dialog, mut handle) = spawn_dialog();
        let token = CancellationToken::new();

        let shown = {
            let dialog = dialog.clone();
            let token = token.clone();
            tokio::spawn(async move { dialog.show("cancel me", Options::BOTH, &token).await })
        };

        match handle.events.recv().await.unwrap() {
            SurfaceEvent::Show { text, .. } => assert_eq!(text, "cancel me"),
            other => panic!("unexpected event {:?}", other),
        }

        token.cancel();
        assert!(matches!(shown.await.unwrap(), Err(ShareError::Cancelled)));
        assert_eq!(handle.events.recv().await.unwrap(), SurfaceEvent::Hide);
    }

    #[tokio::test]
    async fn disallowed_responses_are_ignored() {
        let (dialog, mut handle) = spawn_dialog();
        let token = CancellationToken::new();

        let shown = {
            let dialog = dialog.clone();
            let token = token.clone();
            tokio::spawn(async move { dialog.show("confirm only", Options::CONFIRM, &token).await })
        };

        match handle.events.recv().await.unwrap() {
            SurfaceEvent::Show { options, .. } => assert!(!options.allows(Outcome::Cancel)),
            other => panic!("unexpected event {:?}", other),
        }

        handle.choices.send(Outcome::Cancel).unwrap();
        handle.choices.send(Outcome::Confirm).unwrap();
        assert_eq!(shown.await.unwrap().unwrap(), Outcome::Confirm);
    }
}
