//! Drives an `Orchestrator` against a running model host.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fixity_caption_types::HostMessage;

use super::orchestrator::{Orchestrator, UiState};
use crate::error::SessionError;
use crate::worker::HostChannels;

/// Encode raw image bytes as a data URL, sniffing the MIME type.
pub fn encode_data_url(bytes: &[u8]) -> Result<String, SessionError> {
    let format = image::guess_format(bytes)?;
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(bytes)
    ))
}

/// Read an image file and encode it as a data URL.
pub fn read_image_data_url(path: &Path) -> Result<String, SessionError> {
    let bytes = std::fs::read(path).map_err(|source| SessionError::ReadImage {
        path: path.to_path_buf(),
        source,
    })?;
    encode_data_url(&bytes)
}

pub struct CaptionSession {
    ui: Orchestrator,
    channels: HostChannels,
}

impl CaptionSession {
    pub fn new(channels: HostChannels) -> Self {
        Self {
            ui: Orchestrator::new(),
            channels,
        }
    }

    pub fn ui(&self) -> &Orchestrator {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut Orchestrator {
        &mut self.ui
    }

    async fn next_message(&mut self) -> Result<HostMessage, SessionError> {
        let message = self
            .channels
            .events
            .recv()
            .await
            .ok_or(SessionError::HostExited)?;
        self.ui.apply(&message);
        Ok(message)
    }

    /// Follow the host's preload until the model is ready or fails.
    pub async fn wait_until_ready(
        &mut self,
        mut on_status: impl FnMut(&UiState),
    ) -> Result<(), SessionError> {
        loop {
            let message = self.next_message().await?;
            on_status(self.ui.state());
            match message {
                HostMessage::Ready => return Ok(()),
                HostMessage::Error { error } => return Err(SessionError::Host(error)),
                _ => {}
            }
        }
    }

    /// Submit one image and wait for its caption.
    pub async fn caption(
        &mut self,
        image: String,
        mut on_status: impl FnMut(&UiState),
    ) -> Result<String, SessionError> {
        let command = self.ui.begin_analysis(image)?;
        on_status(self.ui.state());
        self.channels
            .commands
            .send(command)
            .await
            .map_err(|_| SessionError::HostExited)?;

        loop {
            let message = self.next_message().await?;
            on_status(self.ui.state());
            match message {
                HostMessage::Complete { output } => return Ok(output),
                HostMessage::Error { error } => return Err(SessionError::Host(error)),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{png_data_url, FakeLoader, FixedProbe, FAKE_CAPTION};
    use crate::ui::orchestrator::UiError;
    use crate::worker::{spawn_host, HostHandle};
    use fixity_caption_config::HostConfig;
    use std::sync::Arc;

    fn session(loader: FakeLoader) -> (CaptionSession, HostHandle) {
        let (host, channels) = spawn_host(
            Arc::new(loader),
            Box::new(FixedProbe(Some(4))),
            &HostConfig::default(),
        )
        .unwrap();
        (CaptionSession::new(channels), host)
    }

    #[test]
    fn test_encode_data_url_sniffs_mime() {
        let png = png_data_url();
        let (_, payload) = png.split_once(',').unwrap();
        let bytes = STANDARD.decode(payload).unwrap();
        assert_eq!(encode_data_url(&bytes).unwrap(), png);
        assert!(matches!(
            encode_data_url(b"plain text"),
            Err(SessionError::Format(_))
        ));
    }

    #[test]
    fn test_read_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_image_data_url(&dir.path().join("missing.jpg")).unwrap_err();
        assert!(matches!(err, SessionError::ReadImage { .. }));
    }

    #[tokio::test]
    async fn test_session_loads_then_captions() {
        let (mut session, _host) = session(FakeLoader::default());

        let mut seen = Vec::new();
        session
            .wait_until_ready(|state| seen.push(state.clone()))
            .await
            .unwrap();
        assert!(seen
            .iter()
            .any(|s| matches!(s, UiState::ModelLoading { .. })));
        assert_eq!(session.ui().state(), &UiState::ModelReady);

        let caption = session.caption(png_data_url(), |_| {}).await.unwrap();
        assert_eq!(caption, FAKE_CAPTION);
        assert_eq!(session.ui_mut().accept(), Ok(FAKE_CAPTION.to_string()));

        let err = session
            .caption("data:image/png;base64,AAAA".into(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Host(_)));
        assert!(matches!(session.ui().state(), UiState::Error { .. }));

        let caption = session.caption(png_data_url(), |_| {}).await.unwrap();
        assert_eq!(caption, FAKE_CAPTION);
    }

    #[tokio::test]
    async fn test_session_reports_load_failure() {
        let (mut session, _host) = session(FakeLoader::failing("network failure"));
        let err = session.wait_until_ready(|_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "network failure");
    }

    #[tokio::test]
    async fn test_submit_before_ready_is_rejected() {
        let (mut session, _host) = session(FakeLoader::default());
        let err = session.caption(png_data_url(), |_| {}).await.unwrap_err();
        assert!(matches!(err, SessionError::Ui(UiError::NotReady)));
    }
}
