pub mod content;
pub mod edit;
pub mod init;
pub mod tree;

pub use content::{content, ContentArgs};
pub use edit::{add, delete, move_node, rename, AddArgs, DeleteArgs, MoveArgs, RenameArgs};
pub use init::{init, InitArgs};
pub use tree::{tree, TreeArgs};
