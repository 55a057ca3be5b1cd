pub mod canvas;
pub mod conversation;
pub mod events;
pub mod policy;
pub mod research;
pub mod roles;
pub mod toolcall;
pub mod turn;
