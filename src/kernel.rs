//! External numeric kernels
//!
//! The general many-patch matrix fit and spectral re-observation are
//! delegated to Argyll command line utilities. Each is reached through a
//! trait so the pipeline can be driven by in-process fakes in tests. All
//! subprocesses run through [`run_kernel`], which polls for completion and
//! kills the child as soon as the job's [`CancelToken`] fires.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use nalgebra::Matrix3;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::artifact::matrix_from_table;
use crate::color::Xyz;
use crate::constants::external::{GENERAL_FIT_PROGRAM, KERNEL_POLL_INTERVAL, REOBSERVE_PROGRAM};
use crate::error::{CorrectionError, Result};
use crate::measurement::{
    CgatsTable, ColorimetricValue, MeasurementSet, MeasurementSetLoader, Observer, PatchRecord,
};

/// Cooperative cancellation flag shared between a job and its requester
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CorrectionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-job scratch directory, created on first use and removed on drop
#[derive(Debug, Default)]
pub struct ScratchDir {
    dir: OnceLock<TempDir>,
}

impl ScratchDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory path, creating it if needed
    pub fn path(&self) -> Result<&Path> {
        if self.dir.get().is_none() {
            let dir = tempfile::Builder::new()
                .prefix("ccxx-")
                .tempdir()
                .map_err(|e| CorrectionError::io("creating scratch directory", e))?;
            debug!(path = %dir.path().display(), "Created scratch directory");
            let _ = self.dir.set(dir);
        }
        self.dir
            .get()
            .map(TempDir::path)
            .ok_or_else(|| CorrectionError::io("creating scratch directory", std::io::ErrorKind::Other.into()))
    }

    /// Path of a file inside the scratch directory
    pub fn file(&self, name: &str) -> Result<PathBuf> {
        Ok(self.path()?.join(name))
    }

    pub fn is_created(&self) -> bool {
        self.dir.get().is_some()
    }
}

/// Resources a kernel invocation may use
#[derive(Debug, Clone, Copy)]
pub struct KernelContext<'a> {
    pub scratch: &'a ScratchDir,
    pub cancel: &'a CancelToken,
}

/// Captured output of a finished kernel
#[derive(Debug, Clone, Default)]
pub struct KernelOutput {
    pub stdout: String,
    pub stderr: String,
}

impl KernelOutput {
    /// Combined, trimmed output for error reports
    pub fn diagnostics(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run a subprocess to completion unless cancelled
///
/// # Errors
///
/// * `Cancelled` - the token fired; the child has been killed
/// * `Fit(KernelFailed)` - the program could not be started or exited non-zero
pub fn run_kernel(mut command: Command, cancel: &CancelToken) -> Result<KernelOutput> {
    cancel.check()?;
    let program = command.get_program().to_string_lossy().into_owned();
    debug!(program = %program, args = ?command.get_args().collect::<Vec<_>>(), "Starting kernel");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CorrectionError::kernel(format!("failed to execute {}: {}", program, e)))?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        if cancel.is_cancelled() {
            terminate(&mut child);
            warn!(program = %program, "Kernel killed on cancellation");
            return Err(CorrectionError::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(KERNEL_POLL_INTERVAL),
            Err(e) => {
                terminate(&mut child);
                return Err(CorrectionError::kernel(format!("waiting for {}: {}", program, e)));
            }
        }
    };

    let output = KernelOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
    };
    if !status.success() {
        return Err(CorrectionError::kernel(format!(
            "{} returned non-zero exit status ({}): {}",
            program,
            status,
            output.diagnostics()
        )));
    }
    debug!(program = %program, "Kernel finished");
    Ok(output)
}

/// Kill and reap `child` so no zombie is left behind
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// One paired sample handed to the general fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSample {
    pub device: [f64; 3],
    pub reference: Xyz,
    pub colorimeter: Xyz,
}

/// Descriptive metadata passed through to the general fit kernel
#[derive(Debug, Clone, Default)]
pub struct GeneralFitRequest {
    pub description: String,
    pub display: Option<String>,
    pub technology: Option<String>,
    pub reference_instrument: String,
    pub colorimeter_instrument: String,
}

/// Many-patch 3×3 matrix fit
pub trait GeneralFitKernel: Send + Sync {
    /// Fit a matrix mapping colorimeter XYZ onto reference XYZ
    fn fit_matrix(
        &self,
        samples: &[FitSample],
        request: &GeneralFitRequest,
        ctx: KernelContext<'_>,
    ) -> Result<Matrix3<f64>>;
}

/// Recompute XYZ from spectral data under another observer
pub trait SpectralReobserver: Send + Sync {
    /// Derived set with XYZ recomputed under `observer`; spectra unchanged
    fn reobserve(&self, set: &MeasurementSet, observer: Observer, ctx: KernelContext<'_>) -> Result<MeasurementSet>;
}

/// Profile-based prediction of PCS values for device coordinates
///
/// Used to simulate a reference instrument from a display profile instead of
/// physically measuring one.
pub trait ChartLookup: Send + Sync {
    fn lookup(&self, devices: &[[f64; 3]], profile: &Path, ctx: KernelContext<'_>) -> Result<Vec<Xyz>>;
}

/// Build a simulated reference set by predicting every patch of `set`
///
/// For callers that own a [`ChartLookup`], such as an ICC profile lookup.
/// The result stands in for reference measurements; pair it with the
/// original set through [`crate::pairing::PatchPairingMatcher::pair_roles`].
///
/// # Errors
///
/// `KernelFailed` when the lookup returns a different number of values.
pub fn simulate_reference(
    set: &MeasurementSet,
    lookup: &dyn ChartLookup,
    profile: &Path,
    ctx: KernelContext<'_>,
) -> Result<MeasurementSet> {
    let devices: Vec<[f64; 3]> = set.patches.iter().map(|p| p.device).collect();
    let predicted = lookup.lookup(&devices, profile, ctx)?;
    if predicted.len() != devices.len() {
        return Err(CorrectionError::kernel(format!(
            "chart lookup returned {} values for {} patches",
            predicted.len(),
            devices.len()
        )));
    }
    let patches = set
        .patches
        .iter()
        .zip(predicted)
        .map(|(patch, xyz)| PatchRecord {
            sample_id: patch.sample_id,
            device: patch.device,
            value: ColorimetricValue::Xyz(xyz),
            lab: None,
        })
        .collect();
    let mut simulated = set.with_patches(patches);
    simulated.is_spectral = false;
    simulated.spectral_range = None;
    simulated.spectral_fields.clear();
    Ok(simulated)
}

/// Render paired XYZ readings as a CTI3 table for the Argyll tools
fn render_ti3(samples: &[FitSample], instrument: &str, pick: impl Fn(&FitSample) -> Xyz) -> String {
    let mut table = CgatsTable::new("CTI3");
    table.push_keyword("DESCRIPTOR", "Argyll Calibration Target chart information 3");
    table.push_keyword("ORIGINATOR", "Argyll dispread");
    table.push_keyword("DEVICE_CLASS", "DISPLAY");
    table.push_keyword("COLOR_REP", "RGB_XYZ");
    if !instrument.is_empty() {
        table.push_keyword("TARGET_INSTRUMENT", instrument);
    }
    table.fields = ["SAMPLE_ID", "RGB_R", "RGB_G", "RGB_B", "XYZ_X", "XYZ_Y", "XYZ_Z"]
        .iter()
        .map(|f| f.to_string())
        .collect();
    table.rows = samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let xyz = pick(sample);
            let mut row = vec![(i + 1).to_string()];
            row.extend(sample.device.iter().map(|v| v.to_string()));
            row.extend(xyz.to_array().iter().map(|v| v.to_string()));
            row
        })
        .collect();
    table.to_text()
}

fn write_scratch(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).map_err(|e| CorrectionError::io(format!("writing {}", path.display()), e))
}

/// Read the 3×3 matrix from CCMX text
pub(crate) fn matrix_from_ccmx(text: &str, source_name: &str) -> Result<Matrix3<f64>> {
    let table = CgatsTable::parse(text, source_name)?;
    matrix_from_table(&table, source_name)
}

/// General fit through Argyll `ccxxmake`
#[derive(Debug, Clone)]
pub struct ArgyllCcxxmake {
    program: PathBuf,
}

impl Default for ArgyllCcxxmake {
    fn default() -> Self {
        Self::new(GENERAL_FIT_PROGRAM)
    }
}

impl ArgyllCcxxmake {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl GeneralFitKernel for ArgyllCcxxmake {
    fn fit_matrix(
        &self,
        samples: &[FitSample],
        request: &GeneralFitRequest,
        ctx: KernelContext<'_>,
    ) -> Result<Matrix3<f64>> {
        let reference_path = ctx.scratch.file("reference.ti3")?;
        let colorimeter_path = ctx.scratch.file("colorimeter.ti3")?;
        let output_path = ctx.scratch.file("general_fit.ccmx")?;
        write_scratch(
            &reference_path,
            &render_ti3(samples, &request.reference_instrument, |s| s.reference),
        )?;
        write_scratch(
            &colorimeter_path,
            &render_ti3(samples, &request.colorimeter_instrument, |s| s.colorimeter),
        )?;

        let mut command = Command::new(&self.program);
        command.current_dir(ctx.scratch.path()?).arg("-v").arg("-f").arg(format!(
            "{},{}",
            reference_path.display(),
            colorimeter_path.display()
        ));
        command.arg("-E").arg(&request.description);
        match (&request.display, &request.technology) {
            (Some(display), _) => {
                command.arg("-I").arg(display);
            }
            (None, Some(technology)) => {
                command.arg("-T").arg(technology);
            }
            (None, None) => {}
        }
        command.arg(&output_path);

        let output = run_kernel(command, ctx.cancel)?;
        let text = std::fs::read_to_string(&output_path).map_err(|_| {
            CorrectionError::kernel(format!(
                "{} produced no output file: {}",
                self.program.display(),
                output.diagnostics()
            ))
        })?;
        let matrix = matrix_from_ccmx(&text, "general_fit.ccmx").map_err(|e| CorrectionError::kernel(e.to_string()))?;
        info!(samples = samples.len(), "General fit kernel produced matrix");
        Ok(matrix)
    }
}

/// Spectral re-observation through Argyll `spec2cie`
#[derive(Debug, Clone)]
pub struct Spec2Cie {
    program: PathBuf,
}

impl Default for Spec2Cie {
    fn default() -> Self {
        Self::new(REOBSERVE_PROGRAM)
    }
}

impl Spec2Cie {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SpectralReobserver for Spec2Cie {
    fn reobserve(&self, set: &MeasurementSet, observer: Observer, ctx: KernelContext<'_>) -> Result<MeasurementSet> {
        let input_path = ctx.scratch.file("reobserve.ti3")?;
        let output_path = ctx.scratch.file("reobserve.CIE.ti3")?;
        write_scratch(&input_path, set.raw_text())?;

        let mut command = Command::new(&self.program);
        command
            .current_dir(ctx.scratch.path()?)
            .arg("-o")
            .arg(observer.code())
            .arg(&input_path)
            .arg(&output_path);
        let output = run_kernel(command, ctx.cancel)?;

        let text = std::fs::read_to_string(&output_path).map_err(|_| {
            CorrectionError::kernel(format!(
                "{} produced no output file: {}",
                self.program.display(),
                output.diagnostics()
            ))
        })?;
        let recomputed = MeasurementSetLoader::new()
            .load_text(&text, "reobserve.CIE.ti3")
            .map_err(|e| CorrectionError::kernel(e.to_string()))?;
        merge_reobserved(set, &recomputed, observer)
    }
}

/// Copy XYZ from `recomputed` into `set` by sample id, keeping spectra
pub(crate) fn merge_reobserved(
    set: &MeasurementSet,
    recomputed: &MeasurementSet,
    observer: Observer,
) -> Result<MeasurementSet> {
    let patches = set
        .patches
        .iter()
        .map(|patch| {
            recomputed
                .patches
                .iter()
                .find(|p| p.sample_id == patch.sample_id)
                .and_then(PatchRecord::xyz)
                .map(|xyz| patch.with_xyz(xyz))
                .ok_or_else(|| {
                    CorrectionError::kernel(format!(
                        "re-observation returned no XYZ for sample {}",
                        patch.sample_id
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    let mut derived = set.with_patches(patches);
    derived.observer = observer;
    Ok(derived)
}
