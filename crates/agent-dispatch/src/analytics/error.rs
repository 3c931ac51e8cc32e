use std::path::PathBuf;

/// Failures of one analytics turn. Each one is rendered into the turn's reply
/// with [`AnalyticsError::to_payload`] instead of escaping the capability.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("No uploaded files found in '{}'.", .0.display())]
    NoUploadedFile(PathBuf),

    #[error("'{}' is not a file in the upload area.", .0.display())]
    OutsideUploadArea(PathBuf),

    #[error("Unsupported file format '{extension}'. Use .csv, .tsv, .json or .xlsx.")]
    UnsupportedFormat { extension: String },

    #[error("No valid data found in the uploaded file.")]
    EmptyDataset,

    #[error("Could not read the uploaded file: {0}")]
    DatasetParse(String),

    #[error("Pre-execution syntax error:\n\n{message}")]
    SyntaxError { message: String, code: String },

    #[error("Generated code uses a forbidden construct: {construct}")]
    ForbiddenConstruct { construct: String, code: String },

    #[error("Error during code execution:\n\n{message}")]
    RuntimeExecutionError { message: String, code: String },

    #[error("No output captured. Ensure the code uses print(...) to show results.")]
    NoOutputProduced { code: String },

    #[error("Language model call failed while {stage}: {message}")]
    GatewayError { stage: &'static str, message: String },

    #[error("Code sandbox unavailable: {0}")]
    SandboxUnavailable(String),
}

impl AnalyticsError {
    /// Generated code associated with the failure, when there is any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::SyntaxError { code, .. }
            | Self::ForbiddenConstruct { code, .. }
            | Self::RuntimeExecutionError { code, .. }
            | Self::NoOutputProduced { code } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoUploadedFile(_) => "no_uploaded_file",
            Self::OutsideUploadArea(_) => "outside_upload_area",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::EmptyDataset => "empty_dataset",
            Self::DatasetParse(_) => "dataset_parse",
            Self::SyntaxError { .. } => "syntax_error",
            Self::ForbiddenConstruct { .. } => "forbidden_construct",
            Self::RuntimeExecutionError { .. } => "runtime_error",
            Self::NoOutputProduced { .. } => "no_output",
            Self::GatewayError { .. } => "gateway_error",
            Self::SandboxUnavailable(_) => "sandbox_unavailable",
        }
    }

    /// User-facing text embedded in the assistant reply.
    pub fn to_payload(&self) -> String {
        match self.code().filter(|c| !c.trim().is_empty()) {
            Some(code) => format!("❌ {}\n\nCode:\n```python\n{}\n```", self, code.trim_end()),
            None => format!("❌ {}", self),
        }
    }
}
