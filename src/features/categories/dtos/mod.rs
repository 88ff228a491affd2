mod category_dto;

pub use category_dto::{
    CategoryPayloadDto, CategoryResponseDto, CategoryTreeDto, CategoryTreeNodeDto, ParentRefDto,
};
