// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/logger.rs - 日志工具
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use tracing::{Level, info};

/// 供外部绑定使用的简单日志器
///
/// 构造时安装调试级别的全局订阅者；已有订阅者时保持不变。
#[derive(Debug, Clone, Copy)]
pub struct Logger;

impl Default for Logger {
  fn default() -> Self {
    Self::new()
  }
}

impl Logger {
  pub fn new() -> Self {
    let _ = tracing_subscriber::fmt()
      .with_max_level(Level::DEBUG)
      .with_thread_ids(true)
      .try_init();
    Logger
  }

  pub fn log(&self, message: &str) {
    info!("{}", message);
  }
}
