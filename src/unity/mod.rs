use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use binrw::{binrw, BinRead, BinResult, BinWrite};

use crate::unity::bundle::{BundleHeader, BundleNode, UnityFsBundle, NODE_SERIALIZED_FILE};
use crate::unity::serialized::{AssetObject, SerializedFile};
use crate::unity::util::{AlignedString, Endian, PPtr, U8Bool};

pub mod bundle;
pub mod serialized;
pub mod text_asset;
pub mod texture;
pub mod type_tree;
pub mod util;

pub const CLASS_MATERIAL: i32 = 21;
pub const CLASS_TEXTURE_2D: i32 = 28;
pub const CLASS_TEXT_ASSET: i32 = 49;
pub const CLASS_MONO_BEHAVIOUR: i32 = 114;

/// Fields shared by every `MonoBehaviour` before the script's own data.
#[binrw]
#[derive(Debug, Clone, PartialEq)]
pub struct MonoBehaviourHeader {
    pub game_object: PPtr,
    pub enabled: U8Bool,
    #[brw(align_before = 4)]
    pub script: PPtr,
    pub object_name: AlignedString,
}

/// The innermost cause of a binrw error as a single line, without the backtrace
/// frames and terminal colors its `Display` adds.
pub fn plain_error(err: &binrw::Error) -> String {
    match err {
        binrw::Error::Backtrace(bt) => plain_error(&bt.error),
        other => other.to_string().lines().next().unwrap_or_default().to_string(),
    }
}

impl AssetObject {
    pub fn read<T>(&self, endian: Endian) -> BinResult<T>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        T::read_options(&mut Cursor::new(&self.data), endian.into(), ())
    }

    pub fn write<T>(&mut self, value: &T, endian: Endian) -> BinResult<()>
    where
        T: for<'a> BinWrite<Args<'a> = ()>,
    {
        let mut writer = Cursor::new(Vec::with_capacity(self.data.len()));
        value.write_options(&mut writer, endian.into(), ())?;
        self.data = writer.into_inner();
        Ok(())
    }

    /// Reads just the object's name. Named classes store it as their first field;
    /// `MonoBehaviour`s store it after the component header.
    pub fn peek_name(&self, class_id: i32, endian: Endian) -> Option<String> {
        if class_id == CLASS_MONO_BEHAVIOUR {
            self.read::<MonoBehaviourHeader>(endian).ok().map(|h| h.object_name.0)
        } else {
            self.read::<AlignedString>(endian).ok().map(|s| s.0)
        }
    }
}

/// A raw node of a bundle that is not a serialized file, such as a `.resS` stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    File(usize),
    Resource(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct NodeSlot {
    path: String,
    flags: u32,
    slot: Slot,
}

#[derive(Debug, Clone, PartialEq)]
enum Layout {
    Assets,
    Bundle {
        header: BundleHeader,
        nodes: Vec<NodeSlot>,
    },
}

/// A loaded `.assets` file or `UnityFS` bundle. Serialized files and raw resources
/// are kept in separate collections so both can be borrowed mutably at once.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetContainer {
    pub files: Vec<SerializedFile>,
    pub resources: Vec<Resource>,
    layout: Layout,
}

impl AssetContainer {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_bytes(&data)
            .with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        if UnityFsBundle::is_bundle(data) {
            let bundle = UnityFsBundle::parse(data)?;
            return Ok(Self::from_bundle(bundle));
        }
        if data.starts_with(b"UnityWeb") || data.starts_with(b"UnityRaw") {
            anyhow::bail!("Legacy UnityWeb/UnityRaw bundles are not supported");
        }
        let file = SerializedFile::parse(data)?;
        Ok(AssetContainer { files: vec![file], resources: Vec::new(), layout: Layout::Assets })
    }

    fn from_bundle(bundle: UnityFsBundle) -> Self {
        let mut files = Vec::new();
        let mut resources = Vec::new();
        let mut nodes = Vec::with_capacity(bundle.nodes.len());
        for BundleNode { path, flags, data } in bundle.nodes {
            let parsed = if flags & NODE_SERIALIZED_FILE != 0 || SerializedFile::looks_like(&data) {
                match SerializedFile::parse(&data) {
                    Ok(file) => Some(file),
                    Err(e) => {
                        tracing::warn!("Keeping bundle node {} as raw data: {:#}", path, e);
                        None
                    }
                }
            } else {
                None
            };
            let slot = match parsed {
                Some(file) => {
                    files.push(file);
                    Slot::File(files.len() - 1)
                }
                None => {
                    resources.push(Resource { name: path.clone(), data });
                    Slot::Resource(resources.len() - 1)
                }
            };
            nodes.push(NodeSlot { path, flags, slot });
        }

        AssetContainer {
            files,
            resources,
            layout: Layout::Bundle { header: bundle.header, nodes },
        }
    }

    pub fn is_bundle(&self) -> bool {
        matches!(self.layout, Layout::Bundle { .. })
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match &self.layout {
            Layout::Assets => {
                let file = self.files.first().context("Assets container holds no serialized file")?;
                file.to_bytes()
            }
            Layout::Bundle { header, nodes } => {
                let mut out = Vec::with_capacity(nodes.len());
                for node in nodes {
                    let data = match node.slot {
                        Slot::File(index) => self.files[index].to_bytes()
                            .with_context(|| format!("Failed to serialize bundle node {}", node.path))?,
                        Slot::Resource(index) => self.resources[index].data.clone(),
                    };
                    out.push(BundleNode { path: node.path.clone(), flags: node.flags, data });
                }
                UnityFsBundle { header: header.clone(), nodes: out }.to_bytes()
            }
        }
    }
}
