//! Path resolution
//!
//! Paths are `/`-separated byte strings; `.`, `..` and a bare `/` are
//! special. Resolution yields the parent directory handle and the last
//! component, leaving the final lookup to the caller: `create` wants
//! the name to not exist yet, `open` and `remove` want it to.

use alloc::string::String;
use alloc::vec::Vec;

use crate::fs::dir::Dir;
use crate::fs::FileSys;

/// Resolves `path` to (parent directory, last component). Absolute
/// paths start at the root, relative ones at a reopened `cwd` so the
/// caller's handle stays independent. Every intermediate component must
/// name a directory; otherwise all handles opened along the way are
/// released and `None` comes back.
pub fn parse_path(fs: &FileSys, cwd: &Dir, path: &str) -> Option<(Dir, String)> {
    if path == "/" {
        return Some((Dir::open_root(fs), String::from("/")));
    }

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let (&last, walk) = components.split_last()?;

    let mut current = if path.starts_with('/') {
        Dir::open_root(fs)
    } else {
        cwd.reopen(fs)
    };

    for &component in walk {
        match component {
            "." => {}
            ".." => {
                let Some(parent) = current.open_parent(fs) else {
                    current.close(fs);
                    return None;
                };
                current.close(fs);
                current = parent;
            }
            name => {
                let Some(inode) = current.lookup_inode(fs, name) else {
                    current.close(fs);
                    return None;
                };
                // a regular file in the middle of a path dead-ends it
                if !inode.is_dir() {
                    fs.close_inode(&inode);
                    current.close(fs);
                    return None;
                }
                current.close(fs);
                current = Dir::open(inode);
            }
        }
    }

    Some((current, String::from(last)))
}
