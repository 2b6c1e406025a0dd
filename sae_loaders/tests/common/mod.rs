#![allow(dead_code)]
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use sae_loaders::{
    Array, ArtifactFetcher, Device, LocalFetcher,
    hub::FetchError,
    parameters::Dtype,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

pub const REPO_ID: &str = "jbloom/test-saes";
pub const FOLDER: &str = "blocks.0.hook_resid_pre";
pub const D_IN: usize = 4;
pub const D_SAE: usize = 6;
pub const LEGACY_FILE: &str = "gpt2-small_0_24576_z.pt";
pub const LEGACY_CFG_FILE: &str = "gpt2-small_0_24576_z_cfg.json";

pub fn ramp(
    len: usize,
    scale: f32,
) -> Vec<f32> {
    (0..len).map(|i| (i as f32 - len as f32 / 2.0) * scale).collect()
}

/// Encoder/decoder weights and biases of a `D_IN` x `D_SAE` autoencoder.
pub fn sample_tensors() -> Vec<(&'static str, Vec<usize>, Vec<f32>)> {
    vec![
        ("W_enc", vec![D_IN, D_SAE], ramp(D_IN * D_SAE, 0.25)),
        ("b_enc", vec![D_SAE], ramp(D_SAE, 0.5)),
        ("W_dec", vec![D_SAE, D_IN], ramp(D_SAE * D_IN, -0.125)),
        ("b_dec", vec![D_IN], ramp(D_IN, 1.5)),
    ]
}

pub fn sample_sae_lens_config() -> Value {
    json!({
        "model_name": "gpt2-small",
        "hook_point": "blocks.0.hook_resid_pre",
        "hook_point_layer": 0,
        "hook_point_head_index": null,
        "d_in": D_IN,
        "d_sae": D_SAE,
        "dtype": "torch.float16",
        "device": "cuda:7",
        "activation_fn_str": "relu",
        "l1_coefficient": 8e-5,
        "context_size": 128,
    })
}

pub fn sample_legacy_config() -> Value {
    json!({
        "seed": 49,
        "batch_size": 4096,
        "buffer_mult": 384,
        "lr": 0.0012,
        "num_tokens": 2000000000,
        "l1_coeff": 1.2,
        "beta1": 0.9,
        "beta2": 0.99,
        "dict_mult": 32,
        "seq_len": 128,
        "enc_dtype": "fp32",
        "model_name": "gpt2-small",
        "site": "z",
        "layer": 0,
        "device": "cuda",
        "reinit": "reinit",
        "head": "cat",
        "concat_heads": true,
        "resample_scheme": "anthropic",
        "anthropic_neuron_resample_scale": 0.2,
        "dead_direction_cutoff": 1e-6,
        "re_init_every": 25000,
        "anthropic_resample_last": 12500,
        "model_batch_size": 128,
        "log_every": 100,
        "save_every": 100000,
        "act_name": "blocks.0.attn.hook_z",
        "act_size": 768,
        "dict_size": 24576,
        "name": "gpt2-small_0_24576_z",
    })
}

/// Serializes `tensors` as a safetensors container with an 8-byte aligned header.
pub fn safetensors_bytes(
    tensors: &[(&str, &Array)],
    metadata: Option<&[(&str, &str)]>,
) -> Vec<u8> {
    let mut header = serde_json::Map::new();
    if let Some(metadata) = metadata {
        let entries = metadata.iter().map(|(key, value)| (key.to_string(), json!(value))).collect();
        header.insert("__metadata__".to_string(), Value::Object(entries));
    }
    let mut data = Vec::new();
    for (name, array) in tensors {
        let begin = data.len();
        data.extend_from_slice(array.as_bytes());
        let dtype = serde_json::to_value(Dtype::from(array.data_type())).expect("dtype name");
        header.insert(
            name.to_string(),
            json!({
                "dtype": dtype,
                "shape": array.shape(),
                "data_offsets": [begin, data.len()],
            }),
        );
    }
    let mut header_bytes = serde_json::to_vec(&header).expect("serialize header");
    let padding = (8 - header_bytes.len() % 8) % 8;
    header_bytes.extend(std::iter::repeat_n(b' ', padding));

    let mut bytes = (header_bytes.len() as u64).to_le_bytes().to_vec();
    bytes.extend(header_bytes);
    bytes.extend(data);
    bytes
}

/// A local mirror of hub repositories laid out as `<root>/<repo>/<file>`.
pub struct Mirror {
    dir: TempDir,
}

impl Mirror {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn fetcher(&self) -> LocalFetcher {
        LocalFetcher::new(self.root())
    }

    pub fn path(
        &self,
        repo_id: &str,
        filename: &str,
    ) -> PathBuf {
        self.root().join(repo_id).join(filename)
    }

    pub fn write_bytes(
        &self,
        repo_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> PathBuf {
        let path = self.path(repo_id, filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create mirror folder");
        }
        fs::write(&path, bytes).expect("write mirror file");
        path
    }

    pub fn write_json(
        &self,
        repo_id: &str,
        filename: &str,
        value: &Value,
    ) -> PathBuf {
        self.write_bytes(repo_id, filename, value.to_string().as_bytes())
    }

    pub fn write_safetensors(
        &self,
        repo_id: &str,
        filename: &str,
        tensors: &[(&str, Vec<usize>, Vec<f32>)],
    ) -> PathBuf {
        let arrays: Vec<(&str, Array)> = tensors
            .iter()
            .map(|(name, shape, values)| {
                let array = Array::from_elements(values, shape, Device::Cpu).expect("fixture array");
                (*name, array)
            })
            .collect();
        let named: Vec<(&str, &Array)> = arrays.iter().map(|(name, array)| (*name, array)).collect();
        self.write_bytes(repo_id, filename, &safetensors_bytes(&named, None))
    }

    /// `cfg.json` plus `sae_weights.safetensors` under `folder`.
    pub fn write_sae_lens_folder(
        &self,
        repo_id: &str,
        folder: &str,
        config: &Value,
        tensors: &[(&str, Vec<usize>, Vec<f32>)],
    ) {
        self.write_json(repo_id, &format!("{folder}/cfg.json"), config);
        self.write_safetensors(repo_id, &format!("{folder}/sae_weights.safetensors"), tensors);
    }

    pub fn write_legacy_checkpoint(
        &self,
        repo_id: &str,
        source_path: &str,
        config: &Value,
        checkpoint: &TorchCheckpointFixture,
    ) {
        let path = self.write_bytes(repo_id, source_path, b"");
        checkpoint.write(&path);
        let cfg_name = source_path.replace(".pt", "_cfg.json");
        self.write_json(repo_id, &cfg_name, config);
    }
}

/// Fetcher wrapper that records every request.
pub struct RecordingFetcher<F> {
    inner: F,
    calls: Mutex<Vec<(String, bool)>>,
}

impl<F: ArtifactFetcher> RecordingFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn requested(&self) -> Vec<String> {
        self.calls().into_iter().map(|(filename, _)| filename).collect()
    }
}

impl<F: ArtifactFetcher> ArtifactFetcher for RecordingFetcher<F> {
    fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        force_refetch: bool,
    ) -> Result<PathBuf, FetchError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((filename.to_string(), force_refetch));
        self.inner.fetch(repo_id, filename, force_refetch)
    }
}

struct FixtureTensor {
    name: String,
    storage: usize,
    offset: usize,
    shape: Vec<usize>,
    stride: Vec<usize>,
}

/// Writes zip-format `torch.save` archives holding float32 state dicts,
/// pickled with protocol 2 the way PyTorch does.
#[derive(Default)]
pub struct TorchCheckpointFixture {
    storages: Vec<Vec<f32>>,
    tensors: Vec<FixtureTensor>,
}

fn contiguous_stride(shape: &[usize]) -> Vec<usize> {
    let mut stride = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        stride[i] = stride[i + 1] * shape[i + 1];
    }
    stride
}

impl TorchCheckpointFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tensors(tensors: &[(&str, Vec<usize>, Vec<f32>)]) -> Self {
        let mut fixture = Self::new();
        for (name, shape, values) in tensors {
            fixture.push_contiguous(name, shape, values);
        }
        fixture
    }

    pub fn push_storage(
        &mut self,
        values: &[f32],
    ) -> usize {
        self.storages.push(values.to_vec());
        self.storages.len() - 1
    }

    pub fn push_view(
        &mut self,
        name: &str,
        storage: usize,
        offset: usize,
        shape: &[usize],
        stride: &[usize],
    ) {
        self.tensors.push(FixtureTensor {
            name: name.to_string(),
            storage,
            offset,
            shape: shape.to_vec(),
            stride: stride.to_vec(),
        });
    }

    pub fn push_contiguous(
        &mut self,
        name: &str,
        shape: &[usize],
        values: &[f32],
    ) {
        let storage = self.push_storage(values);
        self.push_view(name, storage, 0, shape, &contiguous_stride(shape));
    }

    pub fn pickle(&self) -> Vec<u8> {
        let mut p = vec![0x80, 0x02];
        global(&mut p, "collections", "OrderedDict");
        p.extend_from_slice(&[b')', b'R', b'q', 0x00, b'(']);
        for tensor in &self.tensors {
            unicode(&mut p, &tensor.name);
            global(&mut p, "torch._utils", "_rebuild_tensor_v2");
            p.push(b'(');
            // persistent id: ("storage", FloatStorage, key, location, numel)
            p.push(b'(');
            unicode(&mut p, "storage");
            global(&mut p, "torch", "FloatStorage");
            unicode(&mut p, &tensor.storage.to_string());
            unicode(&mut p, "cpu");
            int(&mut p, self.storages[tensor.storage].len());
            p.extend_from_slice(&[b't', b'Q']);
            int(&mut p, tensor.offset);
            usize_tuple(&mut p, &tensor.shape);
            usize_tuple(&mut p, &tensor.stride);
            p.push(0x89);
            global(&mut p, "collections", "OrderedDict");
            p.extend_from_slice(&[b')', b'R', b't', b'R']);
        }
        p.extend_from_slice(&[b'u', b'.']);
        p
    }

    pub fn write(
        &self,
        path: &Path,
    ) {
        let file = File::create(path).expect("create checkpoint");
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        zip.start_file("archive/data.pkl", options).expect("start data.pkl");
        zip.write_all(&self.pickle()).expect("write data.pkl");
        zip.start_file("archive/byteorder", options).expect("start byteorder");
        zip.write_all(b"little").expect("write byteorder");
        for (key, values) in self.storages.iter().enumerate() {
            zip.start_file(format!("archive/data/{key}"), options).expect("start storage");
            for value in values {
                zip.write_all(&value.to_le_bytes()).expect("write storage");
            }
        }
        zip.start_file("archive/version", options).expect("start version");
        zip.write_all(b"3\n").expect("write version");
        zip.finish().expect("finish checkpoint");
    }
}

fn global(
    out: &mut Vec<u8>,
    module: &str,
    name: &str,
) {
    out.push(b'c');
    out.extend_from_slice(module.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(name.as_bytes());
    out.push(b'\n');
}

fn unicode(
    out: &mut Vec<u8>,
    s: &str,
) {
    out.push(b'X');
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn int(
    out: &mut Vec<u8>,
    value: usize,
) {
    match i32::try_from(value) {
        Ok(small) => {
            out.push(b'J');
            out.extend_from_slice(&small.to_le_bytes());
        },
        Err(_) => {
            // LONG1 with eight little-endian bytes.
            out.extend_from_slice(&[0x8a, 8]);
            out.extend_from_slice(&(value as i64).to_le_bytes());
        },
    }
}

fn usize_tuple(
    out: &mut Vec<u8>,
    values: &[usize],
) {
    out.push(b'(');
    for value in values {
        int(out, *value);
    }
    out.push(b't');
}
