use super::{IntensityEngine, RotationBatch, ScatterProblem, check_batch};
use crate::core::models::ensemble::Species;
use crate::engine::error::{EngineError, check_intensities};
use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;
use std::sync::Arc;
use tracing::{debug, instrument};

const KERNEL_SRC: &str = include_str!("scatter.cu");
const KERNEL_NAME: &str = "scatter_rotations";

/// Rotations per parallel work group; batch lengths dispatched to the CUDA
/// backend must be an exact multiple of this.
pub const THREADS_PER_GROUP: usize = 512;

// Must match MAX_TYPES in scatter.cu.
const MAX_SPECIES_TYPES: usize = 32;

/// CUDA backend of [`IntensityEngine`].
///
/// The kernel is compiled once (nvrtc) when the engine is created; each
/// [`compute_intensities`](IntensityEngine::compute_intensities) call builds
/// a [`CudaInvocation`] that owns its device buffers for the duration of the
/// call. For repeated batches against one loaded structure, create the
/// invocation directly and swap batches with [`CudaInvocation::load_batch`].
pub struct CudaEngine {
    context: Arc<CudaContext>,
    module: Arc<CudaModule>,
    function: CudaFunction,
}

impl CudaEngine {
    #[instrument(level = "info", name = "cuda_engine_init")]
    pub fn new(device_ordinal: usize) -> Result<Self, EngineError> {
        let context = CudaContext::new(device_ordinal)?;
        let ptx = compile_ptx(KERNEL_SRC)?;
        let module = context.load_module(ptx)?;
        let function = module.load_function(KERNEL_NAME)?;
        debug!(device_ordinal, "compiled and loaded scattering kernel");
        Ok(Self {
            context,
            module,
            function,
        })
    }

    /// Validates the problem/batch and uploads everything to the device.
    pub fn invocation(
        &self,
        problem: &ScatterProblem<'_>,
        batch: &RotationBatch,
    ) -> Result<CudaInvocation, EngineError> {
        CudaInvocation::new(self, problem, batch)
    }
}

impl IntensityEngine for CudaEngine {
    #[inline]
    fn preferred_granularity(&self) -> usize {
        THREADS_PER_GROUP
    }

    fn compute_intensities(
        &self,
        problem: &ScatterProblem<'_>,
        batch: &RotationBatch,
    ) -> Result<Vec<f64>, EngineError> {
        let mut invocation = self.invocation(problem, batch)?;
        invocation.run()?;
        invocation.retrieve()
    }
}

/// One kernel invocation with exclusively owned device memory.
///
/// All inputs are validated and transferred host-to-device exactly once, at
/// construction, before any launch. `run()` blocks until the device
/// completes; `retrieve()` blocks on the device-to-host copy. The buffers
/// live as long as the invocation and are released when it drops, on success
/// and failure paths alike; they are never shared between invocations.
pub struct CudaInvocation {
    stream: Arc<CudaStream>,
    function: CudaFunction,

    d_qx: CudaSlice<f32>,
    d_qy: CudaSlice<f32>,
    d_qz: CudaSlice<f32>,
    d_rx: CudaSlice<f32>,
    d_ry: CudaSlice<f32>,
    d_rz: CudaSlice<f32>,
    d_atom_type: CudaSlice<i32>,
    d_cromer_mann: CudaSlice<f32>,
    d_u1: CudaSlice<f32>,
    d_u2: CudaSlice<f32>,
    d_u3: CudaSlice<f32>,
    d_out: CudaSlice<f32>,

    num_q: usize,
    num_atoms: usize,
    num_types: usize,
    batch_len: usize,
}

impl CudaInvocation {
    fn new(
        engine: &CudaEngine,
        problem: &ScatterProblem<'_>,
        batch: &RotationBatch,
    ) -> Result<Self, EngineError> {
        // Every precondition is checked before the first device allocation.
        problem.validate()?;
        check_batch(batch, THREADS_PER_GROUP)?;

        let (atom_type, cromer_mann) = compact_species(problem)?;
        let num_types = cromer_mann.len() / 9;

        let num_q = problem.q_vectors.len();
        let num_atoms = problem.positions.len();
        let batch_len = batch.len();

        let qx: Vec<f32> = problem.q_vectors.iter().map(|v| v.x as f32).collect();
        let qy: Vec<f32> = problem.q_vectors.iter().map(|v| v.y as f32).collect();
        let qz: Vec<f32> = problem.q_vectors.iter().map(|v| v.z as f32).collect();
        let rx: Vec<f32> = problem.positions.iter().map(|p| p.x as f32).collect();
        let ry: Vec<f32> = problem.positions.iter().map(|p| p.y as f32).collect();
        let rz: Vec<f32> = problem.positions.iter().map(|p| p.z as f32).collect();
        let u1: Vec<f32> = batch.draws().iter().map(|d| d[0] as f32).collect();
        let u2: Vec<f32> = batch.draws().iter().map(|d| d[1] as f32).collect();
        let u3: Vec<f32> = batch.draws().iter().map(|d| d[2] as f32).collect();

        let stream = engine.context.default_stream();

        let mut d_qx = stream.alloc_zeros::<f32>(num_q)?;
        let mut d_qy = stream.alloc_zeros::<f32>(num_q)?;
        let mut d_qz = stream.alloc_zeros::<f32>(num_q)?;
        let mut d_rx = stream.alloc_zeros::<f32>(num_atoms)?;
        let mut d_ry = stream.alloc_zeros::<f32>(num_atoms)?;
        let mut d_rz = stream.alloc_zeros::<f32>(num_atoms)?;
        let mut d_atom_type = stream.alloc_zeros::<i32>(num_atoms)?;
        let mut d_cromer_mann = stream.alloc_zeros::<f32>(cromer_mann.len())?;
        let mut d_u1 = stream.alloc_zeros::<f32>(batch_len)?;
        let mut d_u2 = stream.alloc_zeros::<f32>(batch_len)?;
        let mut d_u3 = stream.alloc_zeros::<f32>(batch_len)?;
        let d_out = stream.alloc_zeros::<f32>(num_q)?;

        stream.memcpy_htod(&qx, &mut d_qx)?;
        stream.memcpy_htod(&qy, &mut d_qy)?;
        stream.memcpy_htod(&qz, &mut d_qz)?;
        stream.memcpy_htod(&rx, &mut d_rx)?;
        stream.memcpy_htod(&ry, &mut d_ry)?;
        stream.memcpy_htod(&rz, &mut d_rz)?;
        stream.memcpy_htod(&atom_type, &mut d_atom_type)?;
        stream.memcpy_htod(&cromer_mann, &mut d_cromer_mann)?;
        stream.memcpy_htod(&u1, &mut d_u1)?;
        stream.memcpy_htod(&u2, &mut d_u2)?;
        stream.memcpy_htod(&u3, &mut d_u3)?;

        Ok(Self {
            stream,
            function: engine.function.clone(),
            d_qx,
            d_qy,
            d_qz,
            d_rx,
            d_ry,
            d_rz,
            d_atom_type,
            d_cromer_mann,
            d_u1,
            d_u2,
            d_u3,
            d_out,
            num_q,
            num_atoms,
            num_types,
            batch_len,
        })
    }

    /// Replaces the rotation batch, keeping the loaded structure and grid on
    /// the device. The new batch must have the same length as the original.
    pub fn load_batch(&mut self, batch: &RotationBatch) -> Result<(), EngineError> {
        check_batch(batch, THREADS_PER_GROUP)?;
        if batch.len() != self.batch_len {
            return Err(EngineError::MismatchedLengths {
                left_name: "new batch",
                left: batch.len(),
                right_name: "device batch buffers",
                right: self.batch_len,
            });
        }
        let u1: Vec<f32> = batch.draws().iter().map(|d| d[0] as f32).collect();
        let u2: Vec<f32> = batch.draws().iter().map(|d| d[1] as f32).collect();
        let u3: Vec<f32> = batch.draws().iter().map(|d| d[2] as f32).collect();
        self.stream.memcpy_htod(&u1, &mut self.d_u1)?;
        self.stream.memcpy_htod(&u2, &mut self.d_u2)?;
        self.stream.memcpy_htod(&u3, &mut self.d_u3)?;
        Ok(())
    }

    /// Launches the kernel and blocks until the device completes.
    #[instrument(level = "debug", skip_all, fields(num_q = self.num_q, num_atoms = self.num_atoms, batch = self.batch_len))]
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.stream.memset_zeros(&mut self.d_out)?;

        let groups = (self.batch_len / THREADS_PER_GROUP) as u32;
        let config = LaunchConfig {
            grid_dim: (groups, 1, 1),
            block_dim: (THREADS_PER_GROUP as u32, 1, 1),
            shared_mem_bytes: 0,
        };

        let num_q = self.num_q as i32;
        let num_atoms = self.num_atoms as i32;
        let num_types = self.num_types as i32;

        unsafe {
            let mut builder = self.stream.launch_builder(&self.function);
            builder.arg(&self.d_qx);
            builder.arg(&self.d_qy);
            builder.arg(&self.d_qz);
            builder.arg(&num_q);
            builder.arg(&self.d_rx);
            builder.arg(&self.d_ry);
            builder.arg(&self.d_rz);
            builder.arg(&self.d_atom_type);
            builder.arg(&num_atoms);
            builder.arg(&self.d_cromer_mann);
            builder.arg(&num_types);
            builder.arg(&self.d_u1);
            builder.arg(&self.d_u2);
            builder.arg(&self.d_u3);
            builder.arg(&mut self.d_out);
            builder.launch(config)?;
        }

        self.stream.synchronize()?;
        Ok(())
    }

    /// Copies the accumulated intensities back, normalizes by the batch
    /// size, and runs the shared post-condition check.
    pub fn retrieve(&self) -> Result<Vec<f64>, EngineError> {
        let raw: Vec<f32> = self.stream.clone_dtoh(&self.d_out)?;
        let norm = self.batch_len as f64;
        let intensities: Vec<f64> = raw.iter().map(|&v| v as f64 / norm).collect();
        check_intensities(&intensities)?;
        Ok(intensities)
    }
}

/// Maps species to compact type indices and flattens their Cromer-Mann
/// coefficients into the 9-per-type layout the kernel expects.
fn compact_species(problem: &ScatterProblem<'_>) -> Result<(Vec<i32>, Vec<f32>), EngineError> {
    let mut distinct: Vec<Species> = problem.species.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    if distinct.len() > MAX_SPECIES_TYPES {
        return Err(EngineError::TooManySpecies {
            found: distinct.len(),
            max: MAX_SPECIES_TYPES,
        });
    }

    let atom_type: Vec<i32> = problem
        .species
        .iter()
        .map(|s| distinct.binary_search(s).expect("species taken from input") as i32)
        .collect();

    let mut cromer_mann = Vec::with_capacity(distinct.len() * 9);
    for &s in &distinct {
        let params = problem.form_factors.lookup(s)?;
        cromer_mann.extend(params.a.iter().map(|&a| a as f32));
        cromer_mann.extend(params.b.iter().map(|&b| b as f32));
        cromer_mann.push(params.c as f32);
    }

    Ok((atom_type, cromer_mann))
}
