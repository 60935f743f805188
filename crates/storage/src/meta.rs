use btree::{Map, PageSink, PageSource};

/// The meta map: tracks open-map bookkeeping and store-wide settings that
/// aren't chunk metadata.
///
/// - `"meta.id"` -> hex of the next map id to allocate
/// - `"name.<name>"` -> hex map id
/// - `"map.<hex-id>"` -> `"name:<name>,createVersion:<hex>"`
/// - `"setting.storeVersion"` -> hex store format version
pub struct MetaMap {
    inner: Map<String, String>,
}

impl MetaMap {
    pub const META_ID_KEY: &'static str = "meta.id";
    pub const STORE_VERSION_KEY: &'static str = "setting.storeVersion";

    pub fn new(map_id: u32, create_version: u64) -> Self {
        MetaMap {
            inner: Map::new(map_id, create_version),
        }
    }

    pub fn open(map_id: u32, create_version: u64, root: btree::PagePos, source: &dyn PageSource) -> Self {
        MetaMap {
            inner: Map::open(map_id, create_version, root, source),
        }
    }

    fn name_key(name: &str) -> String {
        format!("name.{name}")
    }

    fn map_key(id: u32) -> String {
        format!("map.{id:08x}")
    }

    /// Restores an arbitrary key/value pair verbatim, used while rebuilding
    /// the map from a decoded page during recovery.
    pub fn put_raw(&mut self, key: String, value: String) {
        self.inner.put(key, value);
    }

    pub fn next_map_id(&mut self) -> u32 {
        let next = self
            .inner
            .get(&Self::META_ID_KEY.to_string())
            .and_then(|v| u32::from_str_radix(&v, 16).ok())
            .unwrap_or(1);
        self.inner
            .put(Self::META_ID_KEY.to_string(), format!("{:x}", next + 1));
        next
    }

    pub fn register_map(&mut self, id: u32, name: &str, create_version: u64) {
        self.inner.put(Self::name_key(name), format!("{id:x}"));
        self.inner.put(
            Self::map_key(id),
            format!("name:{name},createVersion:{create_version:x}"),
        );
    }

    pub fn unregister_map(&mut self, id: u32, name: &str) {
        self.inner.remove(&Self::name_key(name));
        self.inner.remove(&Self::map_key(id));
    }

    pub fn lookup_id(&self, name: &str) -> Option<u32> {
        self.inner
            .get(&Self::name_key(name))
            .and_then(|v| u32::from_str_radix(&v, 16).ok())
    }

    pub fn lookup_name(&self, id: u32) -> Option<String> {
        let entry = self.inner.get(&Self::map_key(id))?;
        let (name_part, _) = entry.split_once(',')?;
        name_part.strip_prefix("name:").map(str::to_string)
    }

    pub fn create_version_of(&self, id: u32) -> Option<u64> {
        let entry = self.inner.get(&Self::map_key(id))?;
        let (_, version_part) = entry.split_once(',')?;
        u64::from_str_radix(version_part.strip_prefix("createVersion:")?, 16).ok()
    }

    pub fn set_store_version(&mut self, version: u32) {
        self.inner
            .put(Self::STORE_VERSION_KEY.to_string(), format!("{version:x}"));
    }

    pub fn store_version(&self) -> Option<u32> {
        self.inner
            .get(&Self::STORE_VERSION_KEY.to_string())
            .and_then(|v| u32::from_str_radix(&v, 16).ok())
    }

    pub fn snapshot_page(&self) -> btree::Page {
        self.inner.snapshot_page()
    }

    pub fn commit_root(&mut self, new_root: btree::PagePos, sink: &mut dyn PageSink) {
        self.inner.commit_root(new_root, sink);
    }

    pub fn root(&self) -> btree::PagePos {
        self.inner.root()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }
}
