//! Result-set mappings and object graph assembly.

pub mod assembler;
pub mod mapping;
pub mod row;

pub use assembler::{page, AssembledRows, PendingLoads, ResultAssembler};
pub use mapping::{
    CollectionElementResult, ComponentFetch, DomainResult, EmbeddableFetch, EntityResult, Fetch,
    FetchKind, ResultSetMapping, SubtypeReader,
};
pub use row::{QueryRow, ResultValue};
