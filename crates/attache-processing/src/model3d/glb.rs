//! GLB container packing and chunk splitting.

use super::gltf::{Buffer, SceneBundle};
use super::Model3dError;

pub const MAGIC: &[u8; 4] = b"glTF";
pub const VERSION: u32 = 2;
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
pub const CHUNK_BIN: u32 = 0x004E_4942;
pub const HEADER_LEN: usize = 12;
pub const CHUNK_HEADER_LEN: usize = 8;

fn pad_to_4(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Merge the bundle's external buffers into one BIN chunk and serialize a
/// self-contained GLB.
pub fn pack(bundle: &SceneBundle) -> Result<Vec<u8>, Model3dError> {
    let mut document = bundle.document.clone();

    let mut bin = Vec::new();
    let mut offsets = Vec::with_capacity(document.buffers.len());
    for index in 0..document.buffers.len() {
        let data = bundle.read_buffer(index)?;
        bin.resize(bin.len() + pad_to_4(bin.len()), 0);
        offsets.push(bin.len());
        bin.extend_from_slice(&data[..document.buffers[index].byte_length]);
    }

    for view in &mut document.buffer_views {
        let offset = offsets.get(view.buffer).ok_or_else(|| {
            Model3dError::Bundle(format!("bufferView references missing buffer {}", view.buffer))
        })?;
        view.byte_offset += offset;
        view.buffer = 0;
    }

    document.buffers = if offsets.is_empty() {
        Vec::new()
    } else {
        vec![Buffer {
            byte_length: bin.len(),
            uri: None,
        }]
    };

    let mut json = serde_json::to_vec(&document)?;
    json.resize(json.len() + pad_to_4(json.len()), b' ');
    bin.resize(bin.len() + pad_to_4(bin.len()), 0);

    let mut total = HEADER_LEN + CHUNK_HEADER_LEN + json.len();
    if !offsets.is_empty() {
        total += CHUNK_HEADER_LEN + bin.len();
    }
    let total_u32 = u32::try_from(total)
        .map_err(|_| Model3dError::Bundle(format!("GLB of {} bytes exceeds 4 GiB", total)))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&total_u32.to_le_bytes());

    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json);

    if !offsets.is_empty() {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin);
    }

    tracing::debug!(
        glb_bytes = out.len(),
        json_bytes = json.len(),
        bin_bytes = bin.len(),
        quantized = bundle.quantized,
        "Packed GLB"
    );

    Ok(out)
}

/// JSON and optional BIN chunk of a GLB file.
#[derive(Debug)]
pub struct Chunks<'a> {
    pub json: &'a [u8],
    pub bin: Option<&'a [u8]>,
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Split a GLB into its chunks, checking the header and chunk framing.
pub fn split(data: &[u8]) -> Result<Chunks<'_>, String> {
    if data.len() < HEADER_LEN {
        return Err(format!("file is {} bytes, shorter than the GLB header", data.len()));
    }
    if &data[0..4] != MAGIC {
        return Err("bad magic, expected 'glTF'".to_string());
    }
    let version = read_u32(data, 4).unwrap_or_default();
    if version != VERSION {
        return Err(format!("unsupported container version {}", version));
    }
    let declared = read_u32(data, 8).unwrap_or_default() as usize;
    if declared != data.len() {
        return Err(format!(
            "header length {} does not match file size {}",
            declared,
            data.len()
        ));
    }
    if declared % 4 != 0 {
        return Err("file length is not 4-byte aligned".to_string());
    }

    let mut json = None;
    let mut bin = None;
    let mut at = HEADER_LEN;
    let mut index = 0;
    while at < data.len() {
        let (Some(length), Some(kind)) = (read_u32(data, at), read_u32(data, at + 4)) else {
            return Err(format!("truncated chunk header at byte {}", at));
        };
        let length = length as usize;
        if length % 4 != 0 {
            return Err(format!("chunk {} length {} is not 4-byte aligned", index, length));
        }
        let start = at + CHUNK_HEADER_LEN;
        let body = data
            .get(start..start + length)
            .ok_or_else(|| format!("chunk {} overruns the file", index))?;
        match (index, kind) {
            (0, CHUNK_JSON) => json = Some(body),
            (0, _) => return Err("first chunk is not JSON".to_string()),
            (1, CHUNK_BIN) => bin = Some(body),
            (_, CHUNK_JSON) | (_, CHUNK_BIN) => {
                return Err(format!("unexpected chunk {} of type {:#010x}", index, kind))
            }
            // unknown chunk types are skipped
            _ => {}
        }
        at = start + length;
        index += 1;
    }

    Ok(Chunks {
        json: json.ok_or_else(|| "missing JSON chunk".to_string())?,
        bin,
    })
}
