use std::fmt::{Display, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    error::{PipelineError, PipelineResult},
    frame::VideoFrame,
    types::{ModelDescriptor, PoseEstimate},
};

/// Capability implemented by every pose estimator.
///
/// A model owns whatever runtime resources it needs. `dispose` must release
/// them, may be called more than once and never fails.
#[async_trait]
pub trait PoseModel: Send {
    async fn load(&mut self) -> anyhow::Result<()>;

    async fn run_inference(&mut self, frame: &VideoFrame) -> anyhow::Result<Vec<PoseEstimate>>;

    fn dispose(&mut self);
}

/// Placeholder model: loads instantly and never detects anything.
#[derive(Default)]
pub struct NoopModel;

#[async_trait]
impl PoseModel for NoopModel {
    async fn load(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run_inference(&mut self, _frame: &VideoFrame) -> anyhow::Result<Vec<PoseEstimate>> {
        Ok(Vec::new())
    }

    fn dispose(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Disposed,
}

impl Display for ModelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Runtime instance of one descriptor. Disposed on drop; never reused after
/// dispose.
pub struct ModelHandle {
    descriptor: ModelDescriptor,
    model: Box<dyn PoseModel>,
    state: ModelState,
    generation: u64,
}

impl ModelHandle {
    pub fn new(descriptor: ModelDescriptor, model: Box<dyn PoseModel>, generation: u64) -> Self {
        Self {
            descriptor,
            model,
            state: ModelState::Unloaded,
            generation,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ModelState::Ready
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Loads the model. On failure the handle is disposed before returning.
    pub async fn load(&mut self) -> PipelineResult<()> {
        if self.state != ModelState::Unloaded {
            return Err(PipelineError::Load {
                id: self.descriptor.id.clone(),
                error: anyhow::anyhow!("cannot load a {} handle", self.state),
            });
        }

        self.state = ModelState::Loading;
        log::debug!("model {}: loading", self.descriptor.id);
        match self.model.load().await {
            Ok(()) => {
                self.state = ModelState::Ready;
                log::info!("model {}: ready", self.descriptor.id);
                Ok(())
            }
            Err(error) => {
                self.dispose();
                Err(PipelineError::Load {
                    id: self.descriptor.id.clone(),
                    error,
                })
            }
        }
    }

    pub async fn run_inference(
        &mut self,
        frame: &VideoFrame,
        timeout: Option<Duration>,
    ) -> PipelineResult<Vec<PoseEstimate>> {
        if self.state != ModelState::Ready {
            return Err(PipelineError::NotReady {
                id: self.descriptor.id.clone(),
            });
        }

        let id = &self.descriptor.id;
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.model.run_inference(frame))
                .await
                .map_err(|_| PipelineError::InferenceTimeout {
                    id: id.clone(),
                    timeout,
                })?,
            None => self.model.run_inference(frame).await,
        };

        result.map_err(|error| PipelineError::Inference {
            id: id.clone(),
            error,
        })
    }

    pub fn dispose(&mut self) {
        if self.state == ModelState::Disposed {
            return;
        }
        self.model.dispose();
        self.state = ModelState::Disposed;
        log::info!("model {}: disposed", self.descriptor.id);
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::types::Color;

    struct Flaky {
        fail_load: bool,
        disposed: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl PoseModel for Flaky {
        async fn load(&mut self) -> anyhow::Result<()> {
            if self.fail_load {
                anyhow::bail!("weights missing");
            }
            Ok(())
        }

        async fn run_inference(&mut self, _frame: &VideoFrame) -> anyhow::Result<Vec<PoseEstimate>> {
            Ok(vec![PoseEstimate::default()])
        }

        fn dispose(&mut self) {
            *self.disposed.lock().unwrap() += 1;
        }
    }

    fn handle(fail_load: bool, disposed: &Arc<Mutex<u32>>) -> ModelHandle {
        ModelHandle::new(
            ModelDescriptor::new("flaky", "Flaky", Color::rgb(1, 2, 3)),
            Box::new(Flaky {
                fail_load,
                disposed: Arc::clone(disposed),
            }),
            1,
        )
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let disposed = Arc::new(Mutex::new(0));
        let mut h = handle(false, &disposed);
        assert_eq!(h.state(), ModelState::Unloaded);

        let frame = VideoFrame::filled(2, 2, [0, 0, 0], 0.0);
        assert!(matches!(
            h.run_inference(&frame, None).await,
            Err(PipelineError::NotReady { .. })
        ));

        h.load().await.unwrap();
        assert!(h.is_ready());
        assert_eq!(h.run_inference(&frame, None).await.unwrap().len(), 1);

        h.dispose();
        h.dispose();
        assert_eq!(h.state(), ModelState::Disposed);
        assert_eq!(*disposed.lock().unwrap(), 1);

        // Disposed is terminal.
        assert!(h.load().await.is_err());
        drop(h);
        assert_eq!(*disposed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_disposes() {
        let disposed = Arc::new(Mutex::new(0));
        let mut h = handle(true, &disposed);
        let err = h.load().await.unwrap_err();
        assert_eq!(err.model_id(), Some("flaky"));
        assert_eq!(h.state(), ModelState::Disposed);
        assert_eq!(*disposed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_disposes_ready_handle() {
        let disposed = Arc::new(Mutex::new(0));
        let mut h = handle(false, &disposed);
        h.load().await.unwrap();
        drop(h);
        assert_eq!(*disposed.lock().unwrap(), 1);
    }
}
