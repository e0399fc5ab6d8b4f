use clap::{Parser, ValueEnum};
use image::ImageFormat;
use std::path::PathBuf;

use crate::model::{BackendPreference, ModelDescriptor, SessionOptions};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// GPU through TensorRT/CUDA
    Accelerator,
    /// CPU only
    Host,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image file or directory of images to stylize
    pub input: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    #[arg(short, long, value_enum, default_value_t = BackendKind::Accelerator)]
    pub backend: BackendKind,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(long)]
    pub intra_threads: Option<usize>,
}

impl Config {
    pub fn model_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::File(self.model_path.clone())
    }

    pub const fn backend_preference(&self) -> BackendPreference {
        match self.backend {
            BackendKind::Accelerator => BackendPreference::Accelerator {
                device_id: self.device_id,
            },
            BackendKind::Host => BackendPreference::Host,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            intra_threads: self.intra_threads,
            ..SessionOptions::default()
        }
    }

    /// `check_format` has already validated the extension.
    pub fn output_format(&self) -> ImageFormat {
        ImageFormat::from_extension(&self.format).unwrap_or(ImageFormat::Png)
    }
}

fn check_format(s: &str) -> Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config =
            Config::try_parse_from(["animegan-rs", "photos", "-m", "AnimeGANv3_Hayao.onnx"])
                .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.format, "png");
        assert_eq!(
            config.backend_preference(),
            BackendPreference::Accelerator { device_id: 0 }
        );
        assert_eq!(config.session_options(), SessionOptions::default());
        assert_eq!(config.output_format(), ImageFormat::Png);
    }

    #[test]
    fn test_host_backend_and_threads() {
        let config = Config::try_parse_from([
            "animegan-rs",
            "in",
            "out",
            "-m",
            "model.onnx",
            "--backend",
            "host",
            "--intra-threads",
            "4",
        ])
        .unwrap();
        assert_eq!(config.backend_preference(), BackendPreference::Host);
        assert_eq!(config.session_options().intra_threads, Some(4));
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(check_format("png").is_ok());
        assert!(check_format("xyz").is_err());
        assert!(Config::try_parse_from(["animegan-rs", "in", "-m", "m.onnx", "-f", "xyz"]).is_err());
    }
}
