//! SeaORM entity models for the request corpus.

mod chunk;
mod request;

pub use chunk::{
    parse_embedding_text, ActiveModel as ChunkActiveModel, Column as ChunkColumn,
    Entity as ChunkEntity, Model as Chunk,
};

pub use request::{
    ActiveModel as RequestActiveModel, Column as RequestColumn, Entity as RequestEntity,
    Model as Request,
};
