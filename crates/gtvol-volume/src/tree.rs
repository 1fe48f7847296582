//! Directory tree recovered while walking a volume.

use crate::entry::join_path;

/// A directory in a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirNode {
    /// Directory name; empty for the root.
    pub name: String,
    /// Full path with `/` separators; empty for the root.
    pub path: String,
    /// First page of the directory.
    pub page: u16,
    subdirs: Vec<usize>,
    files: Vec<usize>,
}

impl DirNode {
    /// Ids of the subdirectories, in name order.
    #[inline]
    pub fn subdirs(&self) -> &[usize] {
        &self.subdirs
    }

    /// Indices of the files directly inside, into [`Volume::files`](crate::Volume::files).
    #[inline]
    pub fn files(&self) -> &[usize] {
        &self.files
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// Arena of directory nodes. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DirTree {
    nodes: Vec<DirNode>,
}

impl DirTree {
    /// Id of the root directory.
    pub const ROOT: usize = 0;

    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![DirNode {
                name: String::new(),
                path: String::new(),
                page: 0,
                subdirs: Vec::new(),
                files: Vec::new(),
            }],
        }
    }

    #[inline]
    pub fn root(&self) -> &DirNode {
        &self.nodes[Self::ROOT]
    }

    #[inline]
    pub fn get(&self, id: usize) -> Option<&DirNode> {
        self.nodes.get(id)
    }

    /// Number of directories, including the root.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All directories in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &DirNode> + '_ {
        self.nodes.iter()
    }

    /// The subdirectories of `node`.
    pub fn children<'a>(&'a self, node: &'a DirNode) -> impl Iterator<Item = &'a DirNode> + 'a {
        node.subdirs.iter().filter_map(|&id| self.nodes.get(id))
    }

    /// Look up a directory by its full path.
    pub fn find(&self, path: &str) -> Option<&DirNode> {
        let path = path.trim_matches('/');
        let mut node = self.root();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = self.children(node).find(|child| child.name == component)?;
        }
        Some(node)
    }

    pub(crate) fn path(&self, id: usize) -> &str {
        &self.nodes[id].path
    }

    pub(crate) fn add_dir(&mut self, parent: usize, name: &str, page: u16) -> usize {
        let id = self.nodes.len();
        let path = join_path(&self.nodes[parent].path, name);
        self.nodes.push(DirNode {
            name: name.to_string(),
            path,
            page,
            subdirs: Vec::new(),
            files: Vec::new(),
        });
        self.nodes[parent].subdirs.push(id);
        id
    }

    pub(crate) fn add_file(&mut self, parent: usize, file_index: usize) {
        self.nodes[parent].files.push(file_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_and_lookup() {
        let mut tree = DirTree::new();
        let car = tree.add_dir(DirTree::ROOT, "car", 3);
        let body = tree.add_dir(car, "body", 9);
        tree.add_file(body, 0);

        assert_eq!(tree.len(), 3);
        assert!(tree.root().is_root());
        assert_eq!(tree.path(body), "car/body");
        assert_eq!(tree.find("car/body").map(|n| n.page), Some(9));
        assert_eq!(tree.find("/car/").map(|n| n.page), Some(3));
        assert_eq!(tree.find("").map(|n| n.page), Some(0));
        assert!(tree.find("car/wheel").is_none());
        assert_eq!(tree.get(body).unwrap().files(), &[0]);
    }
}
