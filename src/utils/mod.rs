// 工具函数

pub mod escape;
