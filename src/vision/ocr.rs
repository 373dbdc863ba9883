//! Recognition engine adapter
//!
//! The text-recognition engine is an external collaborator. This module
//! defines its port ([`RecognitionEngine`] / [`EngineFactory`]) and the
//! [`RecognitionAdapter`] that owns the single, lazily constructed engine
//! handle shared by the manual and automatic capture paths.

use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::shared::lazy::{InitError, LazyShared, LazyState, Released};

/// Progress phase that carries the recognition percentage
pub const PHASE_RECOGNIZING: &str = "recognizing text";

/// Recognition failures. Transient in auto mode; reported on manual capture.
#[derive(Debug, Clone, Error)]
pub enum RecognitionError {
    #[error("recognition engine failed to start: {0}")]
    Construction(String),
    #[error("recognition failed: {0}")]
    Inference(String),
    #[error("recognition engine was released")]
    Released,
}

/// Text returned by the engine for one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
}

/// Incremental progress notification from the engine
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionProgress {
    /// Engine-defined phase tag
    pub phase: String,
    /// Completion of the phase (0.0 - 1.0)
    pub progress: f32,
}

/// Engine-level progress sink
pub type ProgressSink = Arc<dyn Fn(RecognitionProgress) + Send + Sync>;

/// Caller-level progress callback, receives percent complete (0 - 100)
pub type PercentCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// A constructed text-recognition engine
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &str;

    /// Recognize the text in an image
    async fn recognize(
        &self,
        image: &RgbaImage,
        progress: ProgressSink,
    ) -> Result<Recognition, RecognitionError>;

    /// Release engine resources. Called once on teardown.
    async fn terminate(&self);
}

/// Asynchronous, fallible engine construction
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    async fn create(&self) -> Result<Box<dyn RecognitionEngine>, RecognitionError>;
}

/// Owns the process-wide engine handle for one session
pub struct RecognitionAdapter {
    factory: Arc<dyn EngineFactory>,
    engine: LazyShared<Box<dyn RecognitionEngine>, RecognitionError>,
}

impl RecognitionAdapter {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            engine: LazyShared::new(),
        }
    }

    /// Current state of the engine handle
    pub fn engine_state(&self) -> LazyState {
        self.engine.state()
    }

    /// Get the engine, constructing it on first use (single-flight)
    pub async fn engine(&self) -> Result<Arc<Box<dyn RecognitionEngine>>, RecognitionError> {
        let factory = self.factory.clone();
        self.engine
            .get_or_try_init(move || async move {
                info!("Constructing recognition engine");
                let start = Instant::now();
                let engine = factory.create().await?;
                info!("Recognition engine '{}' ready in {:?}", engine.name(), start.elapsed());
                Ok::<_, RecognitionError>(engine)
            })
            .await
            .map_err(|e| match e {
                InitError::Failed(err) => err,
                InitError::Reset => RecognitionError::Released,
            })
    }

    /// Recognize an image, reporting percent complete through `on_progress`
    pub async fn recognize(
        &self,
        image: &RgbaImage,
        on_progress: Option<PercentCallback>,
    ) -> Result<String, RecognitionError> {
        let engine = self.engine().await?;

        let sink: ProgressSink = Arc::new(move |p: RecognitionProgress| {
            if p.phase != PHASE_RECOGNIZING {
                return;
            }
            if let Some(cb) = &on_progress {
                cb((p.progress.clamp(0.0, 1.0) * 100.0).round() as u8);
            }
        });

        let start = Instant::now();
        let recognition = engine.recognize(image, sink).await?;
        debug!(
            "Recognized {} chars from {}x{} image in {:?}",
            recognition.text.chars().count(),
            image.width(),
            image.height(),
            start.elapsed()
        );
        Ok(recognition.text)
    }

    /// Release the engine handle and drop any in-flight construction
    ///
    /// An engine still under construction is terminated as soon as it
    /// finishes; its waiters fail with [`RecognitionError::Released`].
    pub async fn teardown(&self) {
        match self.engine.reset() {
            Released::Nothing => {}
            Released::Ready(engine) => {
                info!("Terminating recognition engine '{}'", engine.name());
                engine.terminate().await;
            }
            Released::Initializing(pending) => {
                debug!("Engine construction in flight during teardown; terminating on completion");
                tokio::spawn(async move {
                    match pending.await {
                        Ok(engine) => engine.terminate().await,
                        Err(e) => warn!("Discarded engine construction failed: {}", e),
                    }
                });
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine shared by the pipeline and auto-capture tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counters observed by tests
    #[derive(Default)]
    pub struct EngineStats {
        pub constructed: AtomicUsize,
        pub recognitions: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub terminated: AtomicUsize,
    }

    /// Replays scripted texts (the last one repeats) after a fixed delay
    pub struct ScriptedEngine {
        script: Mutex<VecDeque<Result<String, String>>>,
        delay: Duration,
        stats: Arc<EngineStats>,
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(
            &self,
            _image: &RgbaImage,
            progress: ProgressSink,
        ) -> Result<Recognition, RecognitionError> {
            let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.stats.recognitions.fetch_add(1, Ordering::SeqCst);

            progress(RecognitionProgress { phase: "loading".into(), progress: 1.0 });
            progress(RecognitionProgress { phase: PHASE_RECOGNIZING.into(), progress: 0.5 });
            tokio::time::sleep(self.delay).await;
            progress(RecognitionProgress { phase: PHASE_RECOGNIZING.into(), progress: 1.0 });

            let next = {
                let mut script = self.script.lock();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            };
            self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

            match next {
                Some(Ok(text)) => Ok(Recognition { text }),
                Some(Err(e)) => Err(RecognitionError::Inference(e)),
                None => Ok(Recognition { text: String::new() }),
            }
        }

        async fn terminate(&self) {
            self.stats.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Factory that builds [`ScriptedEngine`]s sharing one script
    pub struct ScriptedFactory {
        pub script: Vec<Result<String, String>>,
        pub delay: Duration,
        pub construct_delay: Duration,
        pub fail_construction: bool,
        pub stats: Arc<EngineStats>,
    }

    impl ScriptedFactory {
        pub fn texts(texts: &[&str], delay: Duration) -> Self {
            Self {
                script: texts.iter().map(|t| Ok(t.to_string())).collect(),
                delay,
                construct_delay: Duration::ZERO,
                fail_construction: false,
                stats: Arc::new(EngineStats::default()),
            }
        }
    }

    #[async_trait]
    impl EngineFactory for ScriptedFactory {
        async fn create(&self) -> Result<Box<dyn RecognitionEngine>, RecognitionError> {
            tokio::time::sleep(self.construct_delay).await;
            self.stats.constructed.fetch_add(1, Ordering::SeqCst);
            if self.fail_construction {
                return Err(RecognitionError::Construction("no language data".into()));
            }
            Ok(Box::new(ScriptedEngine {
                script: Mutex::new(self.script.iter().cloned().collect()),
                delay: self.delay,
                stats: self.stats.clone(),
            }))
        }
    }
}
