use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use super::{Options, Outcome};

/// The one shared prompt surface the dialog coordinator drives.
///
/// The coordinator guarantees `hide` runs after every `show`, on every exit
/// path, so implementations can treat show/hide as balanced.
#[async_trait]
pub trait PromptSurface: Send {
    /// Make the surface visible with only the allowed response controls.
    async fn show(&mut self, text: &str, options: Options);

    /// Wait for the user to activate one of the shown controls. Returns
    /// `None` when the surface itself has been torn down.
    async fn read_choice(&mut self) -> Option<Outcome>;

    /// Hide the surface and release its controls.
    async fn hide(&mut self);
}

/// Events a frontend receives from a [`ChannelSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Show { text: String, options: Options },
    Hide,
}

/// Frontend side of a [`ChannelSurface`]: receives show/hide events and
/// sends back the user's choice.
pub struct SurfaceHandle {
    pub events: mpsc::UnboundedReceiver<SurfaceEvent>,
    pub choices: mpsc::UnboundedSender<Outcome>,
}

/// A prompt surface bridged over channels to whatever frontend renders it.
/// The binary wires it to the stdin loop; tests script it directly.
pub struct ChannelSurface {
    events: mpsc::UnboundedSender<SurfaceEvent>,
    choices: mpsc::UnboundedReceiver<Outcome>,
}

impl ChannelSurface {
    pub fn new() -> (Self, SurfaceHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (choice_tx, choice_rx) = mpsc::unbounded_channel();

        let surface = Self {
            events: event_tx,
            choices: choice_rx,
        };
        let handle = SurfaceHandle {
            events: event_rx,
            choices: choice_tx,
        };
        (surface, handle)
    }
}

#[async_trait]
impl PromptSurface for ChannelSurface {
    async fn show(&mut self, text: &str, options: Options) {
        debug!("Showing prompt: {}", text);
        let _ = self.events.send(SurfaceEvent::Show {
            text: text.to_string(),
            options,
        });
    }

    async fn read_choice(&mut self) -> Option<Outcome> {
        self.choices.recv().await
    }

    async fn hide(&mut self) {
        let _ = self.events.send(SurfaceEvent::Hide);
    }
}
