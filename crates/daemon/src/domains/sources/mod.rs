mod geomet_pager;
mod master_list;

pub use geomet_pager::*;
pub use master_list::*;
