//! Type trees describe the field layout of one serialized type: names, primitive
//! types, arrays and alignment. Reading an object through its type tree gives a
//! [`Value`] that can be edited by field name and written back, whatever version of
//! the class the game was built with.

use std::io::Cursor;

use anyhow::Context;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::io_ext::WriteExt;
use crate::read_ext::ReadExt;
use crate::unity::util::Endian;

const FLAG_IS_ARRAY: u8 = 0x1;
const META_ALIGN_BYTES: i32 = 0x4000;
const COMMON_STRING_BIT: u32 = 0x8000_0000;
/// Format 19 added a reference type hash to every node.
const REF_TYPE_HASH_VERSION: u32 = 19;

/// Unity's built-in string table. Node names with the high bit set index into it.
const COMMON_STRINGS: &str = "AABB\0AnimationClip\0AnimationCurve\0AnimationState\0Array\0Base\0\
BitField\0bitset\0bool\0char\0ColorRGBA\0Component\0data\0deque\0double\0dynamic_array\0\
FastPropertyName\0first\0float\0Font\0GameObject\0Generic Mono\0GradientNEW\0GUID\0GUIStyle\0\
int\0list\0long long\0map\0Matrix4x4f\0MdFour\0MonoBehaviour\0MonoScript\0m_ByteSize\0m_Curve\0\
m_EditorClassIdentifier\0m_EditorHideFlags\0m_Enabled\0m_ExtensionPtr\0m_GameObject\0m_Index\0\
m_IsArray\0m_IsStatic\0m_MetaFlag\0m_Name\0m_ObjectHideFlags\0m_PrefabInternal\0\
m_PrefabParentObject\0m_Script\0m_StaticEditorFlags\0m_Type\0m_Version\0Object\0pair\0\
PPtr<Component>\0PPtr<GameObject>\0PPtr<Material>\0PPtr<MonoBehaviour>\0PPtr<MonoScript>\0\
PPtr<Object>\0PPtr<Prefab>\0PPtr<Sprite>\0PPtr<TextAsset>\0PPtr<Texture>\0PPtr<Texture2D>\0\
PPtr<Transform>\0Prefab\0Quaternionf\0Rectf\0RectInt\0RectOffset\0second\0set\0short\0size\0\
SInt16\0SInt32\0SInt64\0SInt8\0staticvector\0string\0TextAsset\0TextMesh\0Texture\0Texture2D\0\
Transform\0TypelessData\0UInt16\0UInt32\0UInt64\0UInt8\0unsigned int\0unsigned long long\0\
unsigned short\0vector\0Vector2f\0Vector3f\0Vector4f\0m_ScriptingClassIdentifier\0Gradient\0\
Type*\0int2_storage\0int3_storage\0BoundsInt\0m_CorrespondingSourceObject\0m_PrefabInstance\0\
m_PrefabAsset\0FileSize\0Hash128\0RenderingLayerMask\0";

fn common_string(offset: u32) -> Option<&'static str> {
    let mut pos = 0u32;
    for s in COMMON_STRINGS.split('\0') {
        if pos == offset {
            return Some(s);
        }
        pos += s.len() as u32 + 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeTreeNode {
    pub type_name: String,
    pub name: String,
    pub byte_size: i32,
    pub flags: u8,
    pub meta_flag: i32,
    pub children: Vec<TypeTreeNode>,
}

impl TypeTreeNode {
    pub fn child(&self, name: &str) -> Option<&TypeTreeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn aligned(&self) -> bool {
        self.meta_flag & META_ALIGN_BYTES != 0
    }

    fn is_array(&self) -> bool {
        self.flags & FLAG_IS_ARRAY != 0 || self.type_name == "Array"
    }

    fn is_string(&self) -> bool {
        self.type_name == "string"
    }

    /// The `Array` node and element node behind a `vector`, `map` or bare array field.
    fn array(&self) -> Option<(&TypeTreeNode, &TypeTreeNode)> {
        let array = if self.is_array() {
            self
        } else {
            match self.children.as_slice() {
                [only] if only.is_array() => only,
                _ => return None,
            }
        };
        match array.children.as_slice() {
            [_size, element] => Some((array, element)),
            _ => None,
        }
    }

    /// Element layout of an array field.
    pub fn element(&self) -> Option<&TypeTreeNode> {
        self.array().map(|(_, element)| element)
    }

    fn holds_bytes(&self) -> bool {
        self.children.is_empty()
            && self.byte_size == 1
            && matches!(self.type_name.as_str(), "UInt8" | "SInt8" | "char")
    }

    /// Strings carry their alignment flag on the inner `Array` node.
    fn string_aligned(&self) -> bool {
        self.aligned() || self.children.iter().any(|c| c.aligned() || c.children.iter().any(TypeTreeNode::aligned))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Primitive {
    fn of(node: &TypeTreeNode) -> Option<Self> {
        Some(match node.type_name.as_str() {
            "bool" => Primitive::Bool,
            "SInt8" => Primitive::I8,
            "UInt8" | "char" => Primitive::U8,
            "SInt16" | "short" => Primitive::I16,
            "UInt16" | "unsigned short" => Primitive::U16,
            "SInt32" | "int" | "Type*" => Primitive::I32,
            "UInt32" | "unsigned int" => Primitive::U32,
            "SInt64" | "long long" => Primitive::I64,
            "UInt64" | "unsigned long long" | "FileSize" => Primitive::U64,
            "float" => Primitive::F32,
            "double" => Primitive::F64,
            _ => return None,
        })
    }

    fn zero(self) -> Value {
        match self {
            Primitive::Bool => Value::Bool(false),
            Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::I64 => Value::Int(0),
            Primitive::U8 | Primitive::U16 | Primitive::U32 | Primitive::U64 => Value::UInt(0),
            Primitive::F32 | Primitive::F64 => Value::Float(0.0),
        }
    }
}

/// A field value read through a type tree. Structs keep their field order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Struct(fields) => fields.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            Value::UInt(u) => Some(u as f64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::UInt(u) => i64::try_from(u).ok(),
            Value::Bool(b) => Some(b as i64),
            Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Some(f as i64),
            _ => None,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(u) => Some(u),
            Value::Int(i) => u64::try_from(i).ok(),
            Value::Bool(b) => Some(b as u64),
            Value::Float(f) if f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64 => Some(f as u64),
            _ => None,
        }
    }

    /// The value a freshly constructed field of this layout holds.
    pub fn zero(node: &TypeTreeNode) -> Value {
        if node.is_string() {
            return Value::String(String::new());
        }
        if let Some((_, element)) = node.array() {
            return if element.holds_bytes() { Value::Bytes(Vec::new()) } else { Value::Array(Vec::new()) };
        }
        if node.children.is_empty() {
            return match Primitive::of(node) {
                Some(primitive) => primitive.zero(),
                None => Value::Bytes(vec![0; node.byte_size.max(0) as usize]),
            };
        }
        Value::Struct(node.children.iter().map(|c| (c.name.clone(), Value::zero(c))).collect())
    }

    /// Builds a value of layout `node` from JSON. Struct fields missing from the JSON
    /// are taken from `base` when given, else zeroed. Keys the layout does not know
    /// are ignored.
    pub fn from_json(node: &TypeTreeNode, json: &serde_json::Value, base: Option<&Value>) -> anyhow::Result<Value> {
        use serde_json::Value as Json;

        if node.is_string() {
            let s = json.as_str().with_context(|| format!("Field {} expects a string", node.name))?;
            return Ok(Value::String(s.to_string()));
        }
        if let Some((_, element)) = node.array() {
            let items = json.as_array().with_context(|| format!("Field {} expects an array", node.name))?;
            if element.holds_bytes() {
                let bytes = items.iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .with_context(|| format!("Field {} expects bytes", node.name))?;
                return Ok(Value::Bytes(bytes));
            }
            let items = items.iter()
                .map(|item| Value::from_json(element, item, None))
                .collect::<anyhow::Result<Vec<_>>>()?;
            return Ok(Value::Array(items));
        }
        if node.children.is_empty() {
            let primitive = Primitive::of(node)
                .with_context(|| format!("Field {} has unsupported type {}", node.name, node.type_name))?;
            let value = match (primitive, json) {
                (Primitive::Bool, Json::Bool(b)) => Some(Value::Bool(*b)),
                (Primitive::Bool, _) => None,
                (Primitive::F32 | Primitive::F64, _) => json.as_f64().map(Value::Float),
                (Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::I64, _) => json.as_i64()
                    .or_else(|| json.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::Int),
                (_, _) => json.as_u64()
                    .or_else(|| json.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                    .map(Value::UInt),
            };
            return value.with_context(|| format!("Field {} expects a {}, got {}", node.name, node.type_name, json));
        }

        let object = json.as_object().with_context(|| format!("Field {} expects an object", node.name))?;
        let mut fields = Vec::with_capacity(node.children.len());
        for child in &node.children {
            let existing = base.and_then(|b| b.field(&child.name));
            let value = match object.get(&child.name) {
                Some(json) => Value::from_json(child, json, existing)?,
                None => existing.cloned().unwrap_or_else(|| Value::zero(child)),
            };
            fields.push((child.name.clone(), value));
        }
        Ok(Value::Struct(fields))
    }
}

macro_rules! ordered {
    ($endian:expr, $io:expr, $method:ident $(, $arg:expr)?) => {
        match $endian {
            Endian::Little => $io.$method::<LittleEndian>($($arg)?),
            Endian::Big => $io.$method::<BigEndian>($($arg)?),
        }
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeTree {
    pub root: TypeTreeNode,
}

impl TypeTree {
    /// Parses the blob a serialized file stores per type (format 12 and later).
    pub fn parse(blob: &[u8], version: u32, endian: Endian) -> anyhow::Result<Self> {
        let mut reader = Cursor::new(blob);
        let node_count = usize::try_from(reader.read_i32_order(endian)?)
            .context("Negative type tree node count")?;
        let strings_len = usize::try_from(reader.read_i32_order(endian)?)
            .context("Negative type tree string buffer size")?;
        let node_size = if version >= REF_TYPE_HASH_VERSION { 32 } else { 24 };
        let strings = node_count.checked_mul(node_size)
            .and_then(|len| len.checked_add(8))
            .and_then(|start| Some(start..start.checked_add(strings_len)?))
            .and_then(|range| blob.get(range))
            .context("Type tree is truncated")?;

        let mut stack: Vec<(u8, TypeTreeNode)> = Vec::new();
        for index in 0..node_count {
            let _version = reader.read_i16_order(endian)?;
            let level = reader.read_u8()?;
            let flags = reader.read_u8()?;
            let type_offset = reader.read_u32_order(endian)?;
            let name_offset = reader.read_u32_order(endian)?;
            let byte_size = reader.read_i32_order(endian)?;
            let _index = reader.read_i32_order(endian)?;
            let meta_flag = reader.read_i32_order(endian)?;
            if version >= REF_TYPE_HASH_VERSION {
                let _ref_type_hash = reader.read_i64_order(endian)?;
            }

            let node = TypeTreeNode {
                type_name: resolve_string(strings, type_offset)?,
                name: resolve_string(strings, name_offset)?,
                byte_size,
                flags,
                meta_flag,
                children: Vec::new(),
            };
            match stack.last() {
                None if level != 0 => anyhow::bail!("Type tree does not start at its root"),
                Some(_) if level == 0 => anyhow::bail!("Type tree has a second root at node {}", index),
                Some((previous, _)) if level > previous.saturating_add(1) => {
                    anyhow::bail!("Type tree node {} skips a level", index)
                }
                _ => {}
            }
            fold_into_parents(&mut stack, level);
            stack.push((level, node));
        }

        fold_into_parents(&mut stack, 1);
        match stack.pop() {
            Some((_, root)) if stack.is_empty() => Ok(TypeTree { root }),
            _ => anyhow::bail!("Type tree is empty"),
        }
    }

    /// Reads a whole object. Fails unless the layout accounts for every byte.
    pub fn read(&self, data: &[u8], endian: Endian) -> anyhow::Result<Value> {
        let mut reader = Cursor::new(data);
        let value = read_node(&mut reader, &self.root, endian)?;
        let consumed = (reader.position() as usize).min(data.len());
        if consumed != data.len() {
            anyhow::bail!(
                "{} layout covers {} of the object's {} bytes",
                self.root.type_name, consumed, data.len()
            );
        }
        Ok(value)
    }

    pub fn write(&self, value: &Value, endian: Endian) -> anyhow::Result<Vec<u8>> {
        let mut writer = Cursor::new(Vec::new());
        write_node(&mut writer, &self.root, value, endian)?;
        Ok(writer.into_inner())
    }
}

/// Pops every node at `level` or deeper into the children of the node below it.
fn fold_into_parents(stack: &mut Vec<(u8, TypeTreeNode)>, level: u8) {
    while stack.len() > 1 && stack.last().is_some_and(|(top, _)| *top >= level) {
        if let Some((_, node)) = stack.pop() {
            if let Some((_, parent)) = stack.last_mut() {
                parent.children.push(node);
            }
        }
    }
}

fn resolve_string(strings: &[u8], offset: u32) -> anyhow::Result<String> {
    if offset & COMMON_STRING_BIT != 0 {
        let offset = offset & !COMMON_STRING_BIT;
        return common_string(offset)
            .map(str::to_string)
            .with_context(|| format!("Unknown common string at {}", offset));
    }
    let tail = strings.get(offset as usize..)
        .with_context(|| format!("Type tree string offset {} is out of range", offset))?;
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

fn read_len(reader: &mut Cursor<&[u8]>, endian: Endian, node: &TypeTreeNode) -> anyhow::Result<usize> {
    let len = reader.read_i32_order(endian)?;
    usize::try_from(len).with_context(|| format!("Field {} has negative length {}", node.name, len))
}

fn read_node(reader: &mut Cursor<&[u8]>, node: &TypeTreeNode, endian: Endian) -> anyhow::Result<Value> {
    let mut align = node.aligned();
    let value = if node.is_string() {
        align |= node.string_aligned();
        let len = read_len(reader, endian, node)?;
        let bytes = reader.read_vec(len)?;
        Value::String(String::from_utf8(bytes)
            .with_context(|| format!("Field {} is not valid UTF-8", node.name))?)
    } else if node.type_name == "ManagedReferencesRegistry" {
        anyhow::bail!("Field {} holds managed references, which are not supported", node.name);
    } else if let Some((array, element)) = node.array() {
        align |= array.aligned();
        let len = read_len(reader, endian, node)?;
        if element.holds_bytes() {
            Value::Bytes(reader.read_vec(len)?)
        } else {
            let mut items = Vec::new();
            for _ in 0..len {
                items.push(read_node(reader, element, endian)?);
            }
            Value::Array(items)
        }
    } else if node.children.is_empty() {
        read_primitive(reader, node, endian)?
    } else {
        let mut fields = Vec::with_capacity(node.children.len());
        for child in &node.children {
            let value = read_node(reader, child, endian)
                .with_context(|| format!("Failed to read {}.{}", node.name, child.name))?;
            fields.push((child.name.clone(), value));
        }
        Value::Struct(fields)
    };
    if align {
        reader.skip_to_alignment(4)?;
    }
    Ok(value)
}

fn read_primitive(reader: &mut Cursor<&[u8]>, node: &TypeTreeNode, endian: Endian) -> anyhow::Result<Value> {
    let Some(primitive) = Primitive::of(node) else {
        let size = usize::try_from(node.byte_size)
            .ok()
            .filter(|size| *size > 0)
            .with_context(|| format!("Field {} has unsupported type {}", node.name, node.type_name))?;
        return reader.read_vec(size).map(Value::Bytes);
    };
    let value = match primitive {
        Primitive::Bool => Value::Bool(reader.read_u8()? != 0),
        Primitive::I8 => Value::Int(reader.read_i8()? as i64),
        Primitive::U8 => Value::UInt(reader.read_u8()? as u64),
        Primitive::I16 => Value::Int(ordered!(endian, reader, read_i16)? as i64),
        Primitive::U16 => Value::UInt(ordered!(endian, reader, read_u16)? as u64),
        Primitive::I32 => Value::Int(ordered!(endian, reader, read_i32)? as i64),
        Primitive::U32 => Value::UInt(ordered!(endian, reader, read_u32)? as u64),
        Primitive::I64 => Value::Int(ordered!(endian, reader, read_i64)?),
        Primitive::U64 => Value::UInt(ordered!(endian, reader, read_u64)?),
        Primitive::F32 => Value::Float(ordered!(endian, reader, read_f32)? as f64),
        Primitive::F64 => Value::Float(ordered!(endian, reader, read_f64)?),
    };
    Ok(value)
}

fn mismatch(node: &TypeTreeNode, value: &Value) -> anyhow::Error {
    let held = match value {
        Value::Bool(_) => "a bool",
        Value::Int(_) | Value::UInt(_) => "an integer",
        Value::Float(_) => "a float",
        Value::String(_) => "a string",
        Value::Bytes(_) => "bytes",
        Value::Array(_) => "an array",
        Value::Struct(_) => "a struct",
    };
    anyhow::anyhow!("Field {} of type {} cannot hold {}", node.name, node.type_name, held)
}

fn write_len(writer: &mut Cursor<Vec<u8>>, endian: Endian, node: &TypeTreeNode, len: usize) -> anyhow::Result<()> {
    let len = i32::try_from(len).with_context(|| format!("Field {} is too long", node.name))?;
    writer.write_i32_order(endian, len)
}

fn write_node(writer: &mut Cursor<Vec<u8>>, node: &TypeTreeNode, value: &Value, endian: Endian) -> anyhow::Result<()> {
    let mut align = node.aligned();
    if node.is_string() {
        align |= node.string_aligned();
        let Value::String(s) = value else {
            return Err(mismatch(node, value));
        };
        write_len(writer, endian, node, s.len())?;
        std::io::Write::write_all(writer, s.as_bytes())?;
    } else if let Some((array, element)) = node.array() {
        align |= array.aligned();
        match value {
            Value::Bytes(bytes) if element.holds_bytes() => {
                write_len(writer, endian, node, bytes.len())?;
                std::io::Write::write_all(writer, bytes)?;
            }
            Value::Array(items) => {
                write_len(writer, endian, node, items.len())?;
                for item in items {
                    write_node(writer, element, item, endian)?;
                }
            }
            _ => return Err(mismatch(node, value)),
        }
    } else if node.children.is_empty() {
        write_primitive(writer, node, value, endian)?;
    } else {
        let Value::Struct(fields) = value else {
            return Err(mismatch(node, value));
        };
        for (index, child) in node.children.iter().enumerate() {
            let field = fields.get(index)
                .filter(|(name, _)| *name == child.name)
                .or_else(|| fields.iter().find(|(name, _)| *name == child.name))
                .map(|(_, v)| v)
                .with_context(|| format!("Value for {} has no field {}", node.name, child.name))?;
            write_node(writer, child, field, endian)
                .with_context(|| format!("Failed to write {}.{}", node.name, child.name))?;
        }
    }
    if align {
        writer.align(4)?;
    }
    Ok(())
}

fn write_primitive(writer: &mut Cursor<Vec<u8>>, node: &TypeTreeNode, value: &Value, endian: Endian) -> anyhow::Result<()> {
    let Some(primitive) = Primitive::of(node) else {
        return match value {
            Value::Bytes(bytes) if bytes.len() as i64 == node.byte_size as i64 => {
                std::io::Write::write_all(writer, bytes).map_err(Into::into)
            }
            _ => Err(mismatch(node, value)),
        };
    };
    let out_of_range = || anyhow::anyhow!("Value for {} does not fit a {}", node.name, node.type_name);
    match primitive {
        Primitive::Bool => {
            let Value::Bool(b) = value else {
                return Err(mismatch(node, value));
            };
            writer.write_u8(*b as u8)?;
        }
        Primitive::I8 => writer.write_i8(value.as_i64().and_then(|v| i8::try_from(v).ok()).ok_or_else(out_of_range)?)?,
        Primitive::U8 => writer.write_u8(value.as_u64().and_then(|v| u8::try_from(v).ok()).ok_or_else(out_of_range)?)?,
        Primitive::I16 => {
            let v = value.as_i64().and_then(|v| i16::try_from(v).ok()).ok_or_else(out_of_range)?;
            ordered!(endian, writer, write_i16, v)?
        }
        Primitive::U16 => {
            let v = value.as_u64().and_then(|v| u16::try_from(v).ok()).ok_or_else(out_of_range)?;
            ordered!(endian, writer, write_u16, v)?
        }
        Primitive::I32 => {
            let v = value.as_i64().and_then(|v| i32::try_from(v).ok()).ok_or_else(out_of_range)?;
            ordered!(endian, writer, write_i32, v)?
        }
        Primitive::U32 => {
            let v = value.as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(out_of_range)?;
            ordered!(endian, writer, write_u32, v)?
        }
        Primitive::I64 => {
            let v = value.as_i64().ok_or_else(out_of_range)?;
            ordered!(endian, writer, write_i64, v)?
        }
        Primitive::U64 => {
            let v = value.as_u64().ok_or_else(out_of_range)?;
            ordered!(endian, writer, write_u64, v)?
        }
        Primitive::F32 => {
            let v = value.as_f64().ok_or_else(|| mismatch(node, value))?;
            ordered!(endian, writer, write_f32, v as f32)?
        }
        Primitive::F64 => {
            let v = value.as_f64().ok_or_else(|| mismatch(node, value))?;
            ordered!(endian, writer, write_f64, v)?
        }
    }
    Ok(())
}
