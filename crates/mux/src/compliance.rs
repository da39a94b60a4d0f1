//! BDAV stream configuration checks.
//!
//! Each check belongs to a compliance class; a violated class that the mux
//! options suppressed only warns, otherwise the mux aborts at startup.

use tracing::warn;

use esms::{FrameRateCode, HdmvVideoFormat};
use ts::StreamCodingType;

use crate::error::ComplianceClass;
use crate::settings::MuxOptions;
use crate::{MuxError, Result};

/// Frame rates a BDAV video format accepts (primary streams).
fn allowed_frame_rates(format: HdmvVideoFormat) -> &'static [FrameRateCode] {
    use FrameRateCode::*;
    use HdmvVideoFormat::*;
    match format {
        I1080 => &[F25, F29970],
        P1080 => &[F23976, F24],
        P720 => &[F23976, F24, F50, F59940],
        I480 | P480 => &[F29970],
        I576 | P576 => &[F25],
        P2160 => &[F23976, F24, F25, F29970, F50, F59940],
        Reserved => &[],
    }
}

/// One configuration check outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceIssue {
    /// The violated class.
    pub class: ComplianceClass,
    /// Diagnostic.
    pub message: String,
}

/// Checks a video stream configuration against the BDAV format tables.
pub fn check_video_configuration(
    coding_type: StreamCodingType,
    video_format: HdmvVideoFormat,
    frame_rate: FrameRateCode,
    secondary: bool,
) -> Vec<ComplianceIssue> {
    let mut issues = Vec::new();

    if video_format == HdmvVideoFormat::Reserved {
        issues.push(ComplianceIssue {
            class: ComplianceClass::BdCompliance,
            message: format!(
                "{} geometry is not a BDAV video format",
                coding_type.name()
            ),
        });
        return issues;
    }

    if frame_rate == FrameRateCode::Unspecified {
        issues.push(ComplianceIssue {
            class: ComplianceClass::Compliance,
            message: format!("{} frame rate is not a BDAV rate", coding_type.name()),
        });
    } else if !allowed_frame_rates(video_format).contains(&frame_rate) {
        issues.push(ComplianceIssue {
            class: ComplianceClass::BdCompliance,
            message: format!(
                "{} frame rate {:?} not allowed for format {:?}",
                coding_type.name(),
                frame_rate,
                video_format
            ),
        });
    }

    if secondary
        && matches!(
            video_format,
            HdmvVideoFormat::I1080 | HdmvVideoFormat::P1080 | HdmvVideoFormat::P2160
        )
    {
        issues.push(ComplianceIssue {
            class: ComplianceClass::BdCompliance,
            message: "secondary video streams are limited to SD/720p formats".to_string(),
        });
    }

    issues
}

/// Applies the configured policy: suppressed classes warn, armed classes
/// abort with the first issue.
pub fn enforce(issues: Vec<ComplianceIssue>, options: &MuxOptions) -> Result<()> {
    for issue in issues {
        if options.is_suppressed(issue.class) {
            warn!("{} (suppressed {})", issue.message, issue.class.name());
        } else {
            return Err(MuxError::Compliance {
                class: issue.class,
                message: issue.message,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_configurations_pass() {
        for (format, rate) in [
            (HdmvVideoFormat::I1080, FrameRateCode::F25),
            (HdmvVideoFormat::P1080, FrameRateCode::F23976),
            (HdmvVideoFormat::P720, FrameRateCode::F59940),
            (HdmvVideoFormat::I576, FrameRateCode::F25),
        ] {
            let issues = check_video_configuration(StreamCodingType::Avc, format, rate, false);
            assert!(issues.is_empty(), "{format:?}/{rate:?}");
        }
    }

    #[test]
    fn test_reserved_geometry_flagged() {
        let issues = check_video_configuration(
            StreamCodingType::H262,
            HdmvVideoFormat::Reserved,
            FrameRateCode::F25,
            false,
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].class, ComplianceClass::BdCompliance);
    }

    #[test]
    fn test_wrong_rate_for_format() {
        // 1080i at 23.976 is not a BDAV combination.
        let issues = check_video_configuration(
            StreamCodingType::Avc,
            HdmvVideoFormat::I1080,
            FrameRateCode::F23976,
            false,
        );
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_secondary_video_formats() {
        let issues = check_video_configuration(
            StreamCodingType::Avc,
            HdmvVideoFormat::P1080,
            FrameRateCode::F24,
            true,
        );
        assert_eq!(issues.len(), 1);
        let ok = check_video_configuration(
            StreamCodingType::Avc,
            HdmvVideoFormat::P480,
            FrameRateCode::F29970,
            true,
        );
        assert!(ok.is_empty());
    }

    #[test]
    fn test_enforce_respects_suppression() {
        let issues = check_video_configuration(
            StreamCodingType::H262,
            HdmvVideoFormat::Reserved,
            FrameRateCode::F25,
            false,
        );

        let armed = MuxOptions::default();
        assert!(matches!(
            enforce(issues.clone(), &armed),
            Err(MuxError::Compliance { .. })
        ));

        let suppressed = MuxOptions {
            suppressed_checks: vec![ComplianceClass::BdCompliance],
            ..MuxOptions::default()
        };
        enforce(issues, &suppressed).unwrap();
    }
}
