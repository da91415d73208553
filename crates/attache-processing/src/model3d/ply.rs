//! Stanford PLY reader (ascii, binary little endian, binary big endian).
//!
//! Reads `x y z` and optional `nx ny nz` from the `vertex` element and the
//! index list from the `face` element. Any other element is read and dropped.

use super::mesh::TriangleMesh;
use super::Model3dError;

fn err(message: impl Into<String>) -> Model3dError {
    Model3dError::parse("PLY", message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn from_name(name: &str) -> Result<Self, Model3dError> {
        Ok(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            other => return Err(err(format!("unknown property type '{}'", other))),
        })
    }

    fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

impl Property {
    fn name(&self) -> &str {
        match self {
            Property::Scalar { name, .. } | Property::List { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
    body_offset: usize,
}

fn parse_header(data: &[u8]) -> Result<Header, Model3dError> {
    const END: &[u8] = b"end_header";
    let end = data
        .windows(END.len())
        .position(|w| w == END)
        .ok_or_else(|| err("missing end_header"))?;
    let newline = data[end..]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| err("end_header not terminated"))?;
    let body_offset = end + newline + 1;

    let text = std::str::from_utf8(&data[..end]).map_err(|_| err("header is not ascii"))?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("ply") {
        return Err(err("missing 'ply' magic"));
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["format", kind, _version] => {
                encoding = Some(match *kind {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::BinaryLittleEndian,
                    "binary_big_endian" => Encoding::BinaryBigEndian,
                    other => return Err(err(format!("unknown format '{}'", other))),
                });
            }
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| err(format!("invalid element count '{}'", count)))?,
                properties: Vec::new(),
            }),
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| err("property before element"))?;
                element.properties.push(Property::List {
                    name: name.to_string(),
                    count: Scalar::from_name(count)?,
                    item: Scalar::from_name(item)?,
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| err("property before element"))?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty: Scalar::from_name(ty)?,
                });
            }
            ["comment", ..] | ["obj_info", ..] => {}
            _ => return Err(err(format!("unexpected header line '{}'", line))),
        }
    }

    Ok(Header {
        encoding: encoding.ok_or_else(|| err("missing format line"))?,
        elements,
        body_offset,
    })
}

/// Sequential value source over the body, ascii tokens or packed binary.
enum BodyReader<'a> {
    Ascii(std::str::SplitAsciiWhitespace<'a>),
    Binary {
        data: &'a [u8],
        pos: usize,
        little_endian: bool,
    },
}

impl<'a> BodyReader<'a> {
    fn read(&mut self, ty: Scalar) -> Result<f64, Model3dError> {
        match self {
            BodyReader::Ascii(tokens) => {
                let token = tokens.next().ok_or_else(|| err("unexpected end of data"))?;
                token
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid value '{}'", token)))
            }
            BodyReader::Binary {
                data,
                pos,
                little_endian,
            } => {
                let size = ty.size();
                let bytes = data
                    .get(*pos..*pos + size)
                    .ok_or_else(|| err("unexpected end of data"))?;
                *pos += size;
                let mut buf = [0u8; 8];
                buf[..size].copy_from_slice(bytes);
                if !*little_endian {
                    buf[..size].reverse();
                }
                Ok(match ty {
                    Scalar::I8 => buf[0] as i8 as f64,
                    Scalar::U8 => buf[0] as f64,
                    Scalar::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
                    Scalar::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
                    Scalar::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
                    Scalar::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
                    Scalar::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
                    Scalar::F64 => f64::from_le_bytes(buf),
                })
            }
        }
    }
}

/// Smallest encoding of one record: a packed scalar or list length in binary,
/// one character per value in ascii.
fn min_record_bytes(element: &Element, encoding: Encoding) -> usize {
    element
        .properties
        .iter()
        .map(|property| match (encoding, property) {
            (Encoding::Ascii, _) => 1,
            (_, Property::Scalar { ty, .. }) => ty.size(),
            (_, Property::List { count, .. }) => count.size(),
        })
        .sum()
}

/// Reject headers declaring more records than the body could hold, before
/// any count is used to size a buffer or drive a loop.
fn check_declared_counts(header: &Header, body_len: usize) -> Result<(), Model3dError> {
    let mut required: usize = 0;
    for element in &header.elements {
        if element.count == 0 {
            continue;
        }
        let per_record = min_record_bytes(element, header.encoding);
        if per_record == 0 {
            return Err(err(format!("element '{}' has no properties", element.name)));
        }
        required = element
            .count
            .checked_mul(per_record)
            .and_then(|bytes| required.checked_add(bytes))
            .filter(|&total| total <= body_len)
            .ok_or_else(|| {
                err(format!(
                    "element '{}' declares {} records but the body has {} bytes",
                    element.name, element.count, body_len
                ))
            })?;
    }
    Ok(())
}

pub fn parse(data: &[u8]) -> Result<TriangleMesh, Model3dError> {
    let header = parse_header(data)?;
    let body = &data[header.body_offset..];
    check_declared_counts(&header, body.len())?;
    let mut reader = match header.encoding {
        Encoding::Ascii => BodyReader::Ascii(
            std::str::from_utf8(body)
                .map_err(|_| err("ascii body is not valid text"))?
                .split_ascii_whitespace(),
        ),
        Encoding::BinaryLittleEndian | Encoding::BinaryBigEndian => BodyReader::Binary {
            data: body,
            pos: 0,
            little_endian: header.encoding == Encoding::BinaryLittleEndian,
        },
    };

    let mut mesh = TriangleMesh::default();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut has_normals = false;

    for element in &header.elements {
        match element.name.as_str() {
            "vertex" => {
                let slot = |name: &str| element.properties.iter().position(|p| p.name() == name);
                let xyz = [slot("x"), slot("y"), slot("z")];
                let [Some(x), Some(y), Some(z)] = xyz else {
                    return Err(err("vertex element lacks x/y/z"));
                };
                let normal_slots = [slot("nx"), slot("ny"), slot("nz")];
                has_normals = normal_slots.iter().all(Option::is_some);

                mesh.positions.reserve(element.count);
                let mut values = vec![0f64; element.properties.len()];
                for _ in 0..element.count {
                    for (i, property) in element.properties.iter().enumerate() {
                        values[i] = match property {
                            Property::Scalar { ty, .. } => reader.read(*ty)?,
                            Property::List { count, item, .. } => {
                                skip_list(&mut reader, *count, *item)?;
                                0.0
                            }
                        };
                    }
                    mesh.positions
                        .push([values[x] as f32, values[y] as f32, values[z] as f32]);
                    if let [Some(nx), Some(ny), Some(nz)] = normal_slots {
                        normals.push([values[nx] as f32, values[ny] as f32, values[nz] as f32]);
                    }
                }
            }
            "face" => {
                let index_slot = element
                    .properties
                    .iter()
                    .position(|p| {
                        matches!(p, Property::List { name, .. }
                            if name == "vertex_indices" || name == "vertex_index")
                    })
                    .ok_or_else(|| err("face element lacks vertex_indices"))?;

                let mut polygon: Vec<u32> = Vec::with_capacity(4);
                for _ in 0..element.count {
                    for (i, property) in element.properties.iter().enumerate() {
                        match property {
                            Property::List { count, item, .. } if i == index_slot => {
                                let n = reader.read(*count)? as usize;
                                polygon.clear();
                                for _ in 0..n {
                                    let index = reader.read(*item)?;
                                    if index < 0.0 {
                                        return Err(err("negative face index"));
                                    }
                                    polygon.push(index as u32);
                                }
                                if n < 3 {
                                    return Err(err(format!("face with {} vertices", n)));
                                }
                                for k in 1..n - 1 {
                                    mesh.indices.extend_from_slice(&[
                                        polygon[0],
                                        polygon[k],
                                        polygon[k + 1],
                                    ]);
                                }
                            }
                            Property::List { count, item, .. } => {
                                skip_list(&mut reader, *count, *item)?
                            }
                            Property::Scalar { ty, .. } => {
                                reader.read(*ty)?;
                            }
                        }
                    }
                }
            }
            _ => skip_element(&mut reader, element)?,
        }
    }

    if has_normals {
        mesh.normals = Some(normals);
    }
    Ok(mesh)
}

fn skip_list(reader: &mut BodyReader<'_>, count: Scalar, item: Scalar) -> Result<(), Model3dError> {
    let n = reader.read(count)? as usize;
    for _ in 0..n {
        reader.read(item)?;
    }
    Ok(())
}

fn skip_element(reader: &mut BodyReader<'_>, element: &Element) -> Result<(), Model3dError> {
    for _ in 0..element.count {
        for property in &element.properties {
            match property {
                Property::Scalar { ty, .. } => {
                    reader.read(*ty)?;
                }
                Property::List { count, item, .. } => skip_list(reader, *count, *item)?,
            }
        }
    }
    Ok(())
}
