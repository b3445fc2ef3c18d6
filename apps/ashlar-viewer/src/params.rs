//! Command line parameters.

use std::path::PathBuf;

/// Viewer options from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerParams {
    pub decay: f32,
    pub samples: u32,
    pub output_pattern: String,
    pub capture_frame: Option<u64>,
    pub log_file: Option<PathBuf>,
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            decay: 0.96,
            samples: 1,
            output_pattern: "ashlar_{}.png".to_string(),
            capture_frame: None,
            log_file: None,
        }
    }
}

impl ViewerParams {
    /// Parse options, ignoring unknown flags and unparsable values.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        let mut params = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--decay" => {
                    if let Some(v) = args.next().and_then(|v| v.parse::<f32>().ok()) {
                        params.decay = v.clamp(0.0, 1.0);
                    }
                }
                "--msaa" => {
                    if let Some(v) = args.next().and_then(|v| v.parse::<u32>().ok()) {
                        if v.is_power_of_two() && v <= 8 {
                            params.samples = v;
                        }
                    }
                }
                "-o" | "--output" => {
                    if let Some(v) = args.next() {
                        params.output_pattern = v;
                    }
                }
                "-f" | "--frame" => {
                    if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                        params.capture_frame = Some(v);
                    }
                }
                "--log-file" => {
                    if let Some(v) = args.next() {
                        params.log_file = Some(PathBuf::from(v));
                    }
                }
                _ => {}
            }
        }

        params
    }

    /// Screenshot path for a frame.
    pub fn output_path(&self, frame: u64) -> PathBuf {
        PathBuf::from(self.output_pattern.replace("{}", &frame.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ViewerParams {
        ViewerParams::from_args(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn defaults_without_arguments() {
        assert_eq!(parse(&[]), ViewerParams::default());
    }

    #[test]
    fn parses_all_options() {
        let params = parse(&["--decay", "0.5", "--msaa", "4", "-o", "shot_{}.png", "-f", "30", "--log-file", "run.log"]);
        assert_eq!(params.decay, 0.5);
        assert_eq!(params.samples, 4);
        assert_eq!(params.capture_frame, Some(30));
        assert_eq!(params.output_path(30), PathBuf::from("shot_30.png"));
        assert_eq!(params.log_file, Some(PathBuf::from("run.log")));
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let params = parse(&["--msaa", "3", "--decay", "lots", "--frame"]);
        assert_eq!(params.samples, 1);
        assert_eq!(params.decay, 0.96);
        assert_eq!(params.capture_frame, None);
    }

    #[test]
    fn decay_is_clamped() {
        assert_eq!(parse(&["--decay", "2.5"]).decay, 1.0);
    }
}
