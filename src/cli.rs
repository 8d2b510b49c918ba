use clap::ValueEnum;
use partdl::remux::RemuxMode;

/// How `--combine` joins the sources.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CombineMode {
    /// One stream per source, e.g. video and audio
    Mux,
    /// Sources are consecutive pieces of one stream
    Concat,
}

impl From<CombineMode> for RemuxMode {
    fn from(mode: CombineMode) -> Self {
        match mode {
            CombineMode::Mux => RemuxMode::Mux,
            CombineMode::Concat => RemuxMode::Concat,
        }
    }
}
