//! Mapping raw addresses to the objects that contain them.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::TraceResult;
use crate::types::{Address, ObjectFrame};

/// Attributes a captured address to an object and an object-relative address.
///
/// Implementations own all knowledge of load bias; resolvers only ever see
/// the resulting [`ObjectFrame`].
pub trait ObjectLocator
{
    /// The object containing `address`, or `None` if no loaded object does.
    fn locate(&self, address: Address) -> Option<ObjectFrame>;
}

impl<F> ObjectLocator for F
where
    F: Fn(Address) -> Option<ObjectFrame>,
{
    fn locate(&self, address: Address) -> Option<ObjectFrame>
    {
        self(address)
    }
}

/// One object mapped into a traced process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage
{
    path: PathBuf,
    /// Runtime `[start, end)` of the mapping
    runtime_range: (u64, u64),
    load_address: u64,
    /// Address the object was linked at; object addresses are relative to it
    link_address: u64,
}

impl LoadedImage
{
    /// An object of `size` bytes loaded at `load_address`.
    ///
    /// Object addresses are offsets from `load_address`, which is right for
    /// position-independent objects. Use [`with_link_address`](Self::with_link_address)
    /// for objects linked at a fixed address.
    pub fn new(path: impl Into<PathBuf>, load_address: u64, size: u64) -> Self
    {
        Self {
            path: path.into(),
            runtime_range: (load_address, load_address.saturating_add(size)),
            load_address,
            link_address: 0,
        }
    }

    #[must_use]
    pub fn with_link_address(mut self, vmaddr: u64) -> Self
    {
        self.link_address = vmaddr;
        self
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn contains(&self, address: Address) -> bool
    {
        let addr = address.value();
        addr >= self.runtime_range.0 && addr < self.runtime_range.1
    }

    /// Translate a runtime address into the object's own address space.
    pub fn object_address(&self, address: Address) -> Option<Address>
    {
        if !self.contains(address) {
            return None;
        }
        address
            .value()
            .checked_sub(self.load_address)
            .and_then(|offset| offset.checked_add(self.link_address))
            .map(Address::new)
    }
}

/// A fixed set of loaded objects.
#[derive(Debug, Clone, Default)]
pub struct ImageMap
{
    images: Vec<LoadedImage>,
}

impl ImageMap
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn insert(&mut self, image: LoadedImage)
    {
        self.images.push(image);
    }

    /// The first image whose runtime range contains `address`.
    pub fn find(&self, address: Address) -> Option<&LoadedImage>
    {
        self.images.iter().find(|image| image.contains(address))
    }

    pub fn len(&self) -> usize
    {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.images.is_empty()
    }

    /// Build a map from the text of a Linux `/proc/<pid>/maps` file.
    ///
    /// Each file-backed object with executable mappings contributes one
    /// image spanning those mappings. Its load address is the start of the
    /// mapping at file offset zero, so object addresses come out right for
    /// position-independent objects. Data-only objects, anonymous and pseudo
    /// mappings (`[stack]`, `[vdso]`) are skipped, as are lines that do not
    /// parse.
    pub fn from_proc_maps(maps: &str) -> Self
    {
        let mut objects: Vec<MappedObject> = Vec::new();
        for line in maps.lines() {
            let Some(mapping) = parse_maps_line(line) else {
                if !line.trim().is_empty() {
                    debug!(line, "skipping unparsable maps line");
                }
                continue;
            };
            let index = match objects.iter().position(|object| object.path == mapping.path) {
                Some(index) => index,
                None => {
                    objects.push(MappedObject {
                        path: mapping.path.clone(),
                        base: None,
                        text: None,
                    });
                    objects.len() - 1
                }
            };
            let object = &mut objects[index];
            if mapping.offset == 0 && object.base.is_none() {
                object.base = Some(mapping.start);
            }
            if mapping.executable {
                object.text = Some(match object.text {
                    Some((start, end, offset)) => (start.min(mapping.start), end.max(mapping.end), offset),
                    None => (mapping.start, mapping.end, mapping.offset),
                });
            }
        }

        let images = objects
            .into_iter()
            .filter_map(|object| {
                let (start, end, offset) = object.text?;
                let load_address = object.base.unwrap_or_else(|| start.saturating_sub(offset));
                let mut image = LoadedImage::new(object.path, load_address, end.saturating_sub(load_address));
                image.runtime_range = (start, end);
                Some(image)
            })
            .collect();
        Self { images }
    }

    /// Read and parse a `/proc/<pid>/maps` file.
    ///
    /// # Errors
    ///
    /// [`TraceError::Io`](crate::error::TraceError::Io) when the file cannot be read.
    pub fn read_proc_maps(path: impl AsRef<Path>) -> TraceResult<Self>
    {
        let maps = fs::read_to_string(path.as_ref())?;
        let map = Self::from_proc_maps(&maps);
        debug!(path = %path.as_ref().display(), images = map.len(), "read process maps");
        Ok(map)
    }

    /// Objects mapped into the calling process (Linux only).
    ///
    /// # Errors
    ///
    /// [`TraceError::Io`](crate::error::TraceError::Io) when `/proc/self/maps` cannot be read.
    pub fn current_process() -> TraceResult<Self>
    {
        Self::read_proc_maps("/proc/self/maps")
    }
}

impl ObjectLocator for ImageMap
{
    fn locate(&self, address: Address) -> Option<ObjectFrame>
    {
        let image = self.find(address)?;
        let object_address = image.object_address(address)?;
        Some(ObjectFrame::new(address, object_address, image.path.clone()))
    }
}

struct MappedObject
{
    path: PathBuf,
    /// Start of the mapping at file offset zero
    base: Option<u64>,
    /// Union of the executable mappings, with the file offset of the first
    text: Option<(u64, u64, u64)>,
}

struct Mapping
{
    start: u64,
    end: u64,
    offset: u64,
    executable: bool,
    path: PathBuf,
}

fn parse_maps_line(line: &str) -> Option<Mapping>
{
    // start-end perms offset dev inode path
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.collect::<Vec<_>>().join(" ");
    let path = path.strip_suffix(" (deleted)").unwrap_or(&path);
    if !path.starts_with('/') {
        return None;
    }
    Some(Mapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        executable: perms.contains('x'),
        path: PathBuf::from(path),
    })
}
