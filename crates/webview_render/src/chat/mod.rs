//! Chat transcript rendering: progressive rendering of streaming responses
//! and reconciliation of rendered content parts.

pub mod code_blocks;
pub mod content;
pub mod diff;
pub mod list;
pub mod list_renderer;
pub mod parts;
pub mod progressive;
pub mod row;
pub mod words;

pub use code_blocks::{CodeBlockInfo, CodeBlockRegistry};
pub use content::{
    ChatContent, ChatRequestViewModel, ChatResponseViewModel, ChatTreeItem, ContentKind,
    RenderData,
};
pub use list::{run_chat_list, ChatListView, ChatModelUpdate};
pub use list_renderer::{ChatListItemRenderer, ItemHeightChange, RowTemplate};
pub use parts::{ChatContentPart, ContentPartFactory, ContentPartRegistry, PartContext};
pub use progressive::{get_data_for_progressive_render, get_next_progressive_render_content};
pub use words::get_n_words;
