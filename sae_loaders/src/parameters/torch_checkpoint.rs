use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::HashMap,
    fs::File,
    io::{Read, Seek},
    path::Path,
    rc::Rc,
};

use thiserror::Error;
use zip::ZipArchive;

use crate::{Array, DataType, Device, array::ArraySizeError};

#[derive(Debug, Error)]
pub enum TorchCheckpointError {
    #[error("Failed to read checkpoint: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid checkpoint archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Archive has no data.pkl entry (pre-zip torch checkpoints are not supported)")]
    MissingPickle,
    #[error("Pickle error: {0}")]
    Pickle(String),
    #[error("Unsupported torch storage type: {0}")]
    UnsupportedStorageType(String),
    #[error("Tensor \"{0}\" not found in checkpoint")]
    KeyNotFound(String),
    #[error("Tensor \"{name}\" is a strided view (shape {shape:?}, stride {stride:?}); only contiguous tensors can be read")]
    NonContiguousTensor {
        name: String,
        shape: Box<[usize]>,
        stride: Box<[usize]>,
    },
    #[error("Tensor \"{name}\" needs {need_bytes} bytes at offset {offset_bytes} but its storage holds {storage_bytes}")]
    TensorOutOfBounds {
        name: String,
        storage_bytes: usize,
        need_bytes: usize,
        offset_bytes: usize,
    },
    #[error(transparent)]
    Size(#[from] ArraySizeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorchDType {
    F64,
    F32,
    F16,
    BF16,
    I64,
    I32,
    I16,
    I8,
    U8,
    Bool,
}

impl TorchDType {
    fn from_storage_name(name: &str) -> Option<Self> {
        match name {
            "DoubleStorage" => Some(TorchDType::F64),
            "FloatStorage" => Some(TorchDType::F32),
            "HalfStorage" => Some(TorchDType::F16),
            "BFloat16Storage" => Some(TorchDType::BF16),
            "LongStorage" => Some(TorchDType::I64),
            "IntStorage" => Some(TorchDType::I32),
            "ShortStorage" => Some(TorchDType::I16),
            "CharStorage" => Some(TorchDType::I8),
            "ByteStorage" => Some(TorchDType::U8),
            "BoolStorage" => Some(TorchDType::Bool),
            _ => None,
        }
    }

    pub fn to_data_type(self) -> DataType {
        match self {
            TorchDType::F64 => DataType::F64,
            TorchDType::F32 => DataType::F32,
            TorchDType::F16 => DataType::F16,
            TorchDType::BF16 => DataType::BF16,
            TorchDType::I64 => DataType::I64,
            TorchDType::I32 => DataType::I32,
            TorchDType::I16 => DataType::I16,
            TorchDType::I8 => DataType::I8,
            TorchDType::U8 => DataType::U8,
            TorchDType::Bool => DataType::Bool,
        }
    }

    pub fn element_size_bytes(self) -> usize {
        self.to_data_type().size_in_bytes()
    }
}

#[derive(Debug, Clone)]
pub struct TorchTensor {
    pub dtype: TorchDType,
    pub shape: Box<[usize]>,
    pub data: Vec<u8>,
}

impl TorchTensor {
    pub fn into_array(
        self,
        device: Device,
    ) -> Result<Array, ArraySizeError> {
        Array::from_bytes(self.data, &self.shape, self.dtype.to_data_type(), device)
    }
}

#[derive(Debug, Clone)]
pub struct TorchTensorSpec {
    pub dtype: TorchDType,
    pub shape: Box<[usize]>,
    pub stride: Box<[usize]>,
    pub storage_key: String,
    pub storage_offset_elems: usize,
}

/// A zip-format `torch.save` checkpoint holding a (possibly nested)
/// dictionary of tensors. Nested dictionaries are flattened with `.`.
pub struct TorchCheckpoint<R: Read + Seek> {
    archive: ZipArchive<R>,
    root: String,
    tensors: Vec<(String, TorchTensorSpec)>,
}

impl TorchCheckpoint<File> {
    pub fn open_from_path(
        path: &Path,
    ) -> Result<Self, TorchCheckpointError> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(file)?;
        Self::open_from_archive(archive)
    }
}

impl<R: Read + Seek> TorchCheckpoint<R> {
    pub fn open_from_archive(
        mut archive: ZipArchive<R>,
    ) -> Result<Self, TorchCheckpointError> {
        let root = archive
            .file_names()
            .find_map(|name| {
                if name == "data.pkl" {
                    Some(String::new())
                } else {
                    name.strip_suffix("/data.pkl").map(|root| format!("{root}/"))
                }
            })
            .ok_or(TorchCheckpointError::MissingPickle)?;

        // Validate byteorder (PyTorch uses a zip member for this).
        if let Ok(mut f) = archive.by_name(&format!("{root}byteorder")) {
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let s = s.trim();
            if s != "little" {
                return Err(TorchCheckpointError::Pickle(format!(
                    "Unsupported torch byteorder {s:?} (expected \"little\")"
                )));
            }
        }

        let mut pkl = Vec::new();
        archive.by_name(&format!("{root}data.pkl"))?.read_to_end(&mut pkl)?;

        let tensors = PickleMachine::new(&pkl).parse_state_dict()?;

        Ok(Self {
            archive,
            root,
            tensors,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn spec(
        &self,
        name: &str,
    ) -> Option<&TorchTensorSpec> {
        self.tensors
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, spec)| spec)
    }

    pub fn load_tensor(
        &mut self,
        name: &str,
    ) -> Result<TorchTensor, TorchCheckpointError> {
        let spec = self
            .spec(name)
            .cloned()
            .ok_or_else(|| TorchCheckpointError::KeyNotFound(name.to_string()))?;
        let storage = self.read_storage(&spec.storage_key)?;
        slice_storage(name, &spec, &storage)
    }

    /// Materializes every tensor, reading each shared storage once.
    pub fn load_all(
        &mut self,
        device: Device,
    ) -> Result<HashMap<String, Array>, TorchCheckpointError> {
        let mut storages: HashMap<String, Vec<u8>> = HashMap::new();
        let mut arrays = HashMap::with_capacity(self.tensors.len());
        let tensors = self.tensors.clone();
        for (name, spec) in &tensors {
            if !storages.contains_key(&spec.storage_key) {
                let storage = self.read_storage(&spec.storage_key)?;
                storages.insert(spec.storage_key.clone(), storage);
            }
            let storage = &storages[&spec.storage_key];
            let tensor = slice_storage(name, spec, storage)?;
            arrays.insert(name.clone(), tensor.into_array(device)?);
        }
        Ok(arrays)
    }

    fn read_storage(
        &mut self,
        key: &str,
    ) -> Result<Vec<u8>, TorchCheckpointError> {
        let path = format!("{}data/{}", self.root, key);
        let mut f = self.archive.by_name(&path)?;
        let mut storage = Vec::new();
        f.read_to_end(&mut storage)?;
        Ok(storage)
    }
}

fn slice_storage(
    name: &str,
    spec: &TorchTensorSpec,
    storage: &[u8],
) -> Result<TorchTensor, TorchCheckpointError> {
    let elem_bytes = spec.dtype.element_size_bytes();
    let numel = spec.shape.iter().try_fold(1usize, |n, &dim| n.checked_mul(dim));
    let expected_stride = contiguous_stride(&spec.shape);
    if numel.is_none_or(|n| n > 1) && spec.stride.as_ref() != expected_stride.as_slice() {
        return Err(TorchCheckpointError::NonContiguousTensor {
            name: name.to_string(),
            shape: spec.shape.clone(),
            stride: spec.stride.clone(),
        });
    }

    let begin = spec.storage_offset_elems.checked_mul(elem_bytes);
    let need = numel.and_then(|n| n.checked_mul(elem_bytes));
    let range = begin
        .zip(need)
        .and_then(|(begin, need)| Some(begin..begin.checked_add(need)?))
        .filter(|range| range.end <= storage.len());
    let Some(range) = range else {
        return Err(TorchCheckpointError::TensorOutOfBounds {
            name: name.to_string(),
            storage_bytes: storage.len(),
            need_bytes: need.unwrap_or(usize::MAX),
            offset_bytes: begin.unwrap_or(usize::MAX),
        });
    };

    Ok(TorchTensor {
        dtype: spec.dtype,
        shape: spec.shape.clone(),
        data: storage[range].to_vec(),
    })
}

fn contiguous_stride(shape: &[usize]) -> Vec<usize> {
    let mut stride = vec![0usize; shape.len()];
    let mut s = 1usize;
    for (i, &dim) in shape.iter().enumerate().rev() {
        stride[i] = s;
        s = s.saturating_mul(dim.max(1));
    }
    stride
}

#[derive(Debug, Clone)]
struct GlobalRef {
    module: String,
    name: String,
}

#[derive(Debug, Clone)]
struct StorageRef {
    dtype: TorchDType,
    key: String,
}

type SharedDict = Rc<RefCell<Vec<(Value, Value)>>>;

#[derive(Clone)]
enum Value {
    Int(i64),
    String(String),
    Tuple(Vec<Value>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(SharedDict),
    Global(GlobalRef),
    Storage(StorageRef),
    Tensor(TorchTensorSpec),
    // None, bools, floats: kept on the stack, never inspected.
    Opaque,
}

const MAX_NESTING: usize = 16;

/// Pickle opcodes understood by the state-dict reader (protocols 2 to 4).
mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const BINFLOAT: u8 = b'G';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const BINPERSID: u8 = b'Q';
    pub const REDUCE: u8 = b'R';
    pub const BINUNICODE: u8 = b'X';
    pub const EMPTY_LIST: u8 = b']';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const APPENDS: u8 = b'e';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const SETITEMS: u8 = b'u';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const EMPTY_DICT: u8 = b'}';
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
}

struct PickleMachine<'a> {
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: Vec<Value>,
}

impl<'a> PickleMachine<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: Vec::new(),
        }
    }

    fn parse_state_dict(
        mut self
    ) -> Result<Vec<(String, TorchTensorSpec)>, TorchCheckpointError> {
        let root = self.run()?;
        let Value::Dict(dict) = root else {
            return Err(TorchCheckpointError::Pickle(
                "Checkpoint root is not a dictionary".into(),
            ));
        };
        let mut tensors = Vec::new();
        collect_tensors("", &dict, &mut tensors, 0)?;
        Ok(tensors)
    }

    fn run(&mut self) -> Result<Value, TorchCheckpointError> {
        while self.pos < self.bytes.len() {
            let code = self.read_u8()?;
            match code {
                op::PROTO => {
                    self.read_u8()?;
                },
                op::FRAME => {
                    self.read_bytes(8)?;
                },
                op::GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.stack.push(Value::Global(GlobalRef { module, name }));
                },
                op::STACK_GLOBAL => {
                    let name = self.pop_string()?;
                    let module = self.pop_string()?;
                    self.stack.push(Value::Global(GlobalRef { module, name }));
                },
                op::MARK => {
                    self.marks.push(self.stack.len());
                },
                op::EMPTY_TUPLE => {
                    self.stack.push(Value::Tuple(Vec::new()));
                },
                op::EMPTY_DICT => {
                    self.stack.push(Value::Dict(Rc::new(RefCell::new(Vec::new()))));
                },
                op::EMPTY_LIST => {
                    self.stack.push(Value::List(Rc::new(RefCell::new(Vec::new()))));
                },
                op::DICT => {
                    let items = self.pop_mark()?;
                    let pairs = pairs_from(items)?;
                    self.stack.push(Value::Dict(Rc::new(RefCell::new(pairs))));
                },
                op::BINUNICODE => {
                    let len = self.read_u32_le()? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                },
                op::SHORT_BINUNICODE => {
                    let len = self.read_u8()? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                },
                op::BININT1 => {
                    let v = self.read_u8()? as i64;
                    self.stack.push(Value::Int(v));
                },
                op::BININT2 => {
                    let v = self.read_u16_le()? as i64;
                    self.stack.push(Value::Int(v));
                },
                op::BININT => {
                    let v = self.read_i32_le()? as i64;
                    self.stack.push(Value::Int(v));
                },
                op::LONG1 => {
                    let len = self.read_u8()? as usize;
                    let v = self.read_long(len)?;
                    self.stack.push(Value::Int(v));
                },
                op::BINFLOAT => {
                    self.read_bytes(8)?;
                    self.stack.push(Value::Opaque);
                },
                op::NONE | op::NEWTRUE | op::NEWFALSE => {
                    self.stack.push(Value::Opaque);
                },
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                },
                op::TUPLE1 => {
                    let v = self.pop()?;
                    self.stack.push(Value::Tuple(vec![v]));
                },
                op::TUPLE2 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b]));
                },
                op::TUPLE3 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b, c]));
                },
                op::BINPUT => {
                    let idx = self.read_u8()? as usize;
                    self.memo_set(idx)?;
                },
                op::LONG_BINPUT => {
                    let idx = self.read_u32_le()? as usize;
                    self.memo_set(idx)?;
                },
                op::MEMOIZE => {
                    self.memo_set(self.memo.len())?;
                },
                op::BINGET => {
                    let idx = self.read_u8()? as usize;
                    let v = self.memo_get(idx)?;
                    self.stack.push(v);
                },
                op::LONG_BINGET => {
                    let idx = self.read_u32_le()? as usize;
                    let v = self.memo_get(idx)?;
                    self.stack.push(v);
                },
                op::BINPERSID => {
                    let pid = self.pop()?;
                    let storage = persistent_load(pid)?;
                    self.stack.push(storage);
                },
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let out = reduce(callable, args)?;
                    self.stack.push(out);
                },
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.dict_set_items(vec![key, value])?;
                },
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    self.dict_set_items(items)?;
                },
                op::APPEND => {
                    let value = self.pop()?;
                    self.list_extend(vec![value])?;
                },
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.list_extend(items)?;
                },
                op::BUILD => {
                    // State is dropped.
                    self.pop()?;
                    let inst = self.pop()?;
                    self.stack.push(inst);
                },
                op::STOP => {
                    return self.pop();
                },
                other => {
                    return Err(TorchCheckpointError::Pickle(format!(
                        "Unsupported pickle opcode 0x{other:02x} at pos {}",
                        self.pos.saturating_sub(1)
                    )));
                },
            }
        }
        Err(TorchCheckpointError::Pickle(
            "Unexpected end of pickle stream".into(),
        ))
    }

    fn dict_set_items(
        &mut self,
        items: Vec<Value>,
    ) -> Result<(), TorchCheckpointError> {
        let pairs = pairs_from(items)?;
        match self.stack.last() {
            Some(Value::Dict(dict)) => {
                dict.borrow_mut().extend(pairs);
                Ok(())
            },
            Some(_) => Ok(()),
            None => Err(TorchCheckpointError::Pickle(
                "SETITEM with empty stack".into(),
            )),
        }
    }

    fn list_extend(
        &mut self,
        items: Vec<Value>,
    ) -> Result<(), TorchCheckpointError> {
        match self.stack.last() {
            Some(Value::List(list)) => {
                list.borrow_mut().extend(items);
                Ok(())
            },
            Some(_) => Ok(()),
            None => Err(TorchCheckpointError::Pickle(
                "APPEND with empty stack".into(),
            )),
        }
    }

    fn memo_set(
        &mut self,
        idx: usize,
    ) -> Result<(), TorchCheckpointError> {
        let v = self
            .stack
            .last()
            .cloned()
            .ok_or_else(|| TorchCheckpointError::Pickle("BINPUT with empty stack".into()))?;
        // Memo slots are filled in order; a gap means a corrupt stream.
        match idx.cmp(&self.memo.len()) {
            Ordering::Less => self.memo[idx] = v,
            Ordering::Equal => self.memo.push(v),
            Ordering::Greater => {
                return Err(TorchCheckpointError::Pickle(format!(
                    "Memo index {idx} skips past {} stored entries",
                    self.memo.len()
                )));
            },
        }
        Ok(())
    }

    fn memo_get(
        &self,
        idx: usize,
    ) -> Result<Value, TorchCheckpointError> {
        self.memo
            .get(idx)
            .cloned()
            .ok_or_else(|| TorchCheckpointError::Pickle(format!("Missing memo index {idx}")))
    }

    fn pop(&mut self) -> Result<Value, TorchCheckpointError> {
        self.stack
            .pop()
            .ok_or_else(|| TorchCheckpointError::Pickle("Unexpected empty stack".into()))
    }

    fn pop_string(&mut self) -> Result<String, TorchCheckpointError> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            _ => Err(TorchCheckpointError::Pickle(
                "STACK_GLOBAL expected strings".into(),
            )),
        }
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, TorchCheckpointError> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| TorchCheckpointError::Pickle("Opcode requires MARK".into()))?;
        if mark > self.stack.len() {
            return Err(TorchCheckpointError::Pickle("MARK past end of stack".into()));
        }
        Ok(self.stack.split_off(mark))
    }

    fn read_u8(&mut self) -> Result<u8, TorchCheckpointError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| TorchCheckpointError::Pickle("Unexpected EOF".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(
        &mut self,
        len: usize,
    ) -> Result<&'a [u8], TorchCheckpointError> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            TorchCheckpointError::Pickle("Length overflow".into())
        })?;
        let bytes: &'a [u8] = self.bytes;
        let slice = bytes
            .get(self.pos..end)
            .ok_or_else(|| TorchCheckpointError::Pickle("Unexpected EOF".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u16_le(&mut self) -> Result<u16, TorchCheckpointError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32_le(&mut self) -> Result<u32, TorchCheckpointError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32_le(&mut self) -> Result<i32, TorchCheckpointError> {
        Ok(self.read_u32_le()? as i32)
    }

    fn read_long(
        &mut self,
        len: usize,
    ) -> Result<i64, TorchCheckpointError> {
        if len > 8 {
            return Err(TorchCheckpointError::Pickle(format!(
                "LONG1 of {len} bytes does not fit in 64 bits"
            )));
        }
        let b = self.read_bytes(len)?;
        let negative = b.last().is_some_and(|byte| byte & 0x80 != 0);
        let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
        buf[..len].copy_from_slice(b);
        Ok(i64::from_le_bytes(buf))
    }

    fn read_line(&mut self) -> Result<String, TorchCheckpointError> {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            return Err(TorchCheckpointError::Pickle(
                "GLOBAL missing newline".into(),
            ));
        }
        let line = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|e| TorchCheckpointError::Pickle(format!("Invalid UTF-8: {e}")))?;
        self.pos += 1; // consume newline
        Ok(line.to_string())
    }

    fn read_utf8(
        &mut self,
        len: usize,
    ) -> Result<String, TorchCheckpointError> {
        let slice = self.read_bytes(len)?;
        std::str::from_utf8(slice)
            .map(|s| s.to_string())
            .map_err(|e| TorchCheckpointError::Pickle(format!("Invalid UTF-8: {e}")))
    }
}

fn pairs_from(
    items: Vec<Value>
) -> Result<Vec<(Value, Value)>, TorchCheckpointError> {
    if items.len() % 2 != 0 {
        return Err(TorchCheckpointError::Pickle(
            "SETITEMS expected even number of items".into(),
        ));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn collect_tensors(
    prefix: &str,
    dict: &SharedDict,
    out: &mut Vec<(String, TorchTensorSpec)>,
    depth: usize,
) -> Result<(), TorchCheckpointError> {
    if depth > MAX_NESTING {
        return Err(TorchCheckpointError::Pickle(
            "State dict nesting too deep".into(),
        ));
    }
    for (key, value) in dict.borrow().iter() {
        let Value::String(key) = key else {
            continue;
        };
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Tensor(spec) => {
                match out.iter_mut().find(|(existing, _)| *existing == name) {
                    Some(entry) => entry.1 = spec.clone(),
                    None => out.push((name, spec.clone())),
                }
            },
            Value::Dict(nested) => {
                collect_tensors(&name, nested, out, depth + 1)?;
            },
            _ => {},
        }
    }
    Ok(())
}

fn reduce(
    callable: Value,
    args: Value,
) -> Result<Value, TorchCheckpointError> {
    let Value::Global(global) = callable else {
        return Err(TorchCheckpointError::Pickle(
            "REDUCE expected GLOBAL callable".into(),
        ));
    };
    let Value::Tuple(args) = args else {
        return Err(TorchCheckpointError::Pickle(
            "REDUCE expected tuple args".into(),
        ));
    };

    match (global.module.as_str(), global.name.as_str()) {
        ("collections", "OrderedDict") | ("builtins", "dict") => {
            Ok(Value::Dict(Rc::new(RefCell::new(Vec::new()))))
        },
        ("torch._utils", "_rebuild_tensor_v2") => {
            // Args: (storage, storage_offset, size, stride, requires_grad, backward_hooks[, metadata])
            if args.len() < 4 {
                return Err(TorchCheckpointError::Pickle(format!(
                    "_rebuild_tensor_v2 expected at least 4 args, got {}",
                    args.len()
                )));
            }

            let Value::Storage(storage) = args[0].clone() else {
                return Err(TorchCheckpointError::Pickle(
                    "_rebuild_tensor_v2 arg0 must be Storage".into(),
                ));
            };
            let storage_offset_elems = as_usize(&args[1])?;
            let shape = tuple_usizes(&args[2])?;
            let stride = tuple_usizes(&args[3])?;

            Ok(Value::Tensor(TorchTensorSpec {
                dtype: storage.dtype,
                shape,
                stride,
                storage_key: storage.key,
                storage_offset_elems,
            }))
        },
        ("torch._utils", "_rebuild_parameter")
        | ("torch._utils", "_rebuild_parameter_with_state") => {
            // Args: (tensor, requires_grad, backward_hooks[, state])
            match args.into_iter().next() {
                Some(tensor @ Value::Tensor(_)) => Ok(tensor),
                _ => Err(TorchCheckpointError::Pickle(
                    "_rebuild_parameter arg0 must be a tensor".into(),
                )),
            }
        },
        _ => Err(TorchCheckpointError::Pickle(format!(
            "Unsupported REDUCE callable {}.{}",
            global.module, global.name
        ))),
    }
}

fn persistent_load(pid: Value) -> Result<Value, TorchCheckpointError> {
    let Value::Tuple(items) = pid else {
        return Err(TorchCheckpointError::Pickle(
            "BINPERSID expected tuple pid".into(),
        ));
    };
    if items.len() != 5 {
        return Err(TorchCheckpointError::Pickle(format!(
            "Unsupported persistent id tuple length {}",
            items.len()
        )));
    }
    let Value::String(kind) = &items[0] else {
        return Err(TorchCheckpointError::Pickle(
            "persistent id kind must be string".into(),
        ));
    };
    if kind != "storage" {
        return Err(TorchCheckpointError::Pickle(format!(
            "Unsupported persistent id kind {kind:?}"
        )));
    }
    let Value::Global(storage_type) = &items[1] else {
        return Err(TorchCheckpointError::Pickle(
            "persistent id storage type must be GLOBAL".into(),
        ));
    };
    let dtype = match storage_type.module.as_str() {
        "torch" => TorchDType::from_storage_name(&storage_type.name),
        _ => None,
    }
    .ok_or_else(|| {
        TorchCheckpointError::UnsupportedStorageType(format!(
            "{}.{}",
            storage_type.module, storage_type.name
        ))
    })?;
    let Value::String(key) = &items[2] else {
        return Err(TorchCheckpointError::Pickle(
            "persistent id storage key must be string".into(),
        ));
    };
    Ok(Value::Storage(StorageRef {
        dtype,
        key: key.clone(),
    }))
}

fn as_usize(v: &Value) -> Result<usize, TorchCheckpointError> {
    match v {
        Value::Int(i) => (*i)
            .try_into()
            .map_err(|_| TorchCheckpointError::Pickle("negative int".into())),
        _ => Err(TorchCheckpointError::Pickle(
            "Expected integer".into(),
        )),
    }
}

fn tuple_usizes(v: &Value) -> Result<Box<[usize]>, TorchCheckpointError> {
    let Value::Tuple(items) = v else {
        return Err(TorchCheckpointError::Pickle(
            "Expected tuple".into(),
        ));
    };
    items
        .iter()
        .map(as_usize)
        .collect::<Result<Vec<_>, _>>()
        .map(Vec::into_boxed_slice)
}
