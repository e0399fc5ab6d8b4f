use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use ndarray::prelude::*;
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider,
    },
    session::{builder::SessionBuilder, Session},
    value::TensorRef,
};
use tracing::{debug, info};

use crate::{
    codec,
    errors::{Result, StyleError},
    traits::StyleBackend,
};

/// Where the generator's ONNX graph comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelDescriptor {
    File(PathBuf),
    Bytes(Arc<[u8]>),
}

impl ModelDescriptor {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Rejects descriptors that cannot possibly hold a model, before ort is involved.
    fn validate(&self) -> Result<()> {
        match self {
            Self::File(path) if !path.is_file() => Err(StyleError::model_load(
                format!("model file lookup: {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "model file does not exist"),
            )),
            Self::Bytes(bytes) if bytes.is_empty() => Err(StyleError::model_load(
                "model blob validation",
                "model blob is empty",
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<&Path> for ModelDescriptor {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

/// Execution target for the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPreference {
    /// GPU compute through TensorRT or CUDA. Loading fails if CUDA cannot be registered.
    Accelerator { device_id: i32 },
    /// Host CPU.
    Host,
}

impl Default for BackendPreference {
    fn default() -> Self {
        Self::Accelerator { device_id: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Intra-op thread count; `None` leaves the runtime default.
    pub intra_threads: Option<usize>,
    pub memory_pattern: bool,
    /// `(width, height)` of a zero frame run once after loading, so the first
    /// real frame does not pay for kernel selection.
    pub warmup: Option<(u32, u32)>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            intra_threads: None,
            memory_pattern: true,
            warmup: None,
        }
    }
}

/// AnimeGAN generator running on ONNX Runtime.
pub struct OnnxBackend {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxBackend {
    pub fn load(
        descriptor: &ModelDescriptor,
        preference: BackendPreference,
        options: &SessionOptions,
    ) -> Result<Self> {
        descriptor.validate()?;
        let started = Instant::now();

        let mut builder = Session::builder()
            .map_err(|e| StyleError::model_load("session builder initialization", e))?;
        builder = Self::configure_execution_providers(builder, preference)
            .map_err(|e| StyleError::model_load("execution provider registration", e))?;
        builder = builder
            .with_memory_pattern(options.memory_pattern)
            .map_err(|e| StyleError::model_load("memory pattern setting", e))?;
        if let Some(threads) = options.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| StyleError::model_load("intra-op thread setting", e))?;
        }

        let session = match descriptor {
            ModelDescriptor::File(path) => builder.commit_from_file(path),
            ModelDescriptor::Bytes(bytes) => builder.commit_from_memory(bytes),
        }
        .map_err(|e| StyleError::model_load(format!("model load: {}", descriptor), e))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| StyleError::model_load("model input lookup", "model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| StyleError::model_load("model output lookup", "model has no outputs"))?;

        let mut backend = Self {
            session,
            input_name,
            output_name,
        };

        if let Some((width, height)) = options.warmup {
            let data = Array4::<f32>::zeros(codec::tensor_shape(width, height));
            backend
                .run(data.view())
                .map_err(|e| StyleError::model_load("warm-up run", e))?;
            debug!(width, height, "warm-up run finished");
        }

        info!(
            model = %descriptor,
            backend = ?preference,
            input = %backend.input_name,
            output = %backend.output_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(backend)
    }

    fn configure_execution_providers(
        builder: SessionBuilder,
        preference: BackendPreference,
    ) -> std::result::Result<SessionBuilder, ort::Error> {
        match preference {
            BackendPreference::Accelerator { device_id } => builder.with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()
                    .error_on_failure(),
            ]),
            BackendPreference::Host => {
                builder.with_execution_providers([CPUExecutionProvider::default().build()])
            }
        }
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

impl StyleBackend for OnnxBackend {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn run(&mut self, input: ArrayView4<f32>) -> Result<Array4<f32>> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&input.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file_is_a_load_error() {
        let descriptor = ModelDescriptor::file("does/not/exist/AnimeGANv3.onnx");
        let err = OnnxBackend::load(&descriptor, BackendPreference::Host, &SessionOptions::default())
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, StyleError::ModelLoad { .. }));
    }

    #[test]
    fn test_empty_blob_is_a_load_error() {
        let descriptor = ModelDescriptor::bytes(Vec::new());
        let err = OnnxBackend::load(&descriptor, BackendPreference::Host, &SessionOptions::default())
            .err()
            .expect("empty blob must fail");
        assert!(matches!(err, StyleError::ModelLoad { .. }));
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(ModelDescriptor::bytes(vec![0u8; 16]).to_string(), "<16 bytes>");
        assert_eq!(
            ModelDescriptor::file("models/AnimeGANv3_Hayao.onnx").to_string(),
            "models/AnimeGANv3_Hayao.onnx"
        );
    }

    #[test]
    fn test_default_preference_is_first_accelerator() {
        assert_eq!(
            BackendPreference::default(),
            BackendPreference::Accelerator { device_id: 0 }
        );
    }
}
