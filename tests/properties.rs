//! 性质测试: 随机生成箱位集合，验证容量与占用口径的不变量
//!
//! Run with: `cargo test --test properties`

mod test_helpers;

#[path = "properties/capacity.rs"]
mod capacity;
