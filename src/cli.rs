use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colorimeter_correction::{CorrectionKind, FitMethod, Observer, OverwritePolicy, Technology};

#[derive(Parser, Debug)]
#[command(
    name = "ccxx-fit",
    version,
    about = "Fit CCMX and CCSS colorimeter corrections from display measurements"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit a correction and write it to the output directory
    Fit(FitArgs),
    /// Print the metadata and statistics of a correction file
    Inspect(InspectArgs),
    /// Print the repository query key of a correction file
    Hash(InspectArgs),
    /// Print Lab and sRGB previews of a measurement file
    Preview(PreviewArgs),
    /// Convert an iColorDisplay DeviceCorrections.txt into CCMX files
    Import(ImportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FitArgs {
    /// Reference instrument measurements (spectral for CCSS)
    #[arg(long)]
    pub reference: PathBuf,

    /// Colorimeter measurements (matrix corrections)
    #[arg(long)]
    pub colorimeter: Option<PathBuf>,

    /// JSON job configuration; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,

    /// Skip scaling the four-color matrix to the reference white luminance
    #[arg(long, default_value_t = false)]
    pub no_y_correction: bool,

    /// Colorimeter observer code (e.g. 1931_2)
    #[arg(long)]
    pub observer: Option<Observer>,

    /// Observer for spectral reference data
    #[arg(long)]
    pub reference_observer: Option<Observer>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub display: Option<String>,

    #[arg(long)]
    pub manufacturer: Option<String>,

    #[arg(long)]
    pub manufacturer_id: Option<String>,

    /// Display technology (e.g. "LCD White LED", "OLED")
    #[arg(long)]
    pub technology: Option<Technology>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub overwrite: Option<OverwriteArg>,

    /// Directory containing the Argyll executables
    #[arg(long)]
    pub argyll_dir: Option<PathBuf>,

    /// Do not query or upload to the correction repository
    #[arg(long, default_value_t = false)]
    pub no_upload: bool,

    #[arg(long)]
    pub repository_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// CCMX or CCSS file
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    /// CGATS measurement file
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// DeviceCorrections.txt
    pub path: PathBuf,

    /// Defaults to the directory of the input file
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Replace existing CCMX files
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Matrix,
    Spectral,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum MethodArg {
    FourColor,
    General,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OverwriteArg {
    Ask,
    Always,
    Never,
}

impl From<KindArg> for CorrectionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Matrix => CorrectionKind::Matrix,
            KindArg::Spectral => CorrectionKind::Spectral,
        }
    }
}

impl From<MethodArg> for FitMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::FourColor => FitMethod::FourColor,
            MethodArg::General => FitMethod::General,
        }
    }
}

impl From<OverwriteArg> for OverwritePolicy {
    fn from(policy: OverwriteArg) -> Self {
        match policy {
            OverwriteArg::Ask => OverwritePolicy::Ask,
            OverwriteArg::Always => OverwritePolicy::Always,
            OverwriteArg::Never => OverwritePolicy::Never,
        }
    }
}
