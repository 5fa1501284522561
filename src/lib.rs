// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod input;
pub mod logger;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod region;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 将模型位置转换为后端 URL
///
/// 已经带有方案的位置（如 `rknn:///models/det.rknn`）原样解析；
/// 普通文件路径会先转为绝对路径并做百分号转义，再补上 `default_scheme`，
/// 因此文件名中的 `%`、`?`、`#` 不会被当作转义、查询或片段。
pub fn model_url(location: &str, default_scheme: &str) -> Result<url::Url, url::ParseError> {
  if location.contains("://") {
    return url::Url::parse(location);
  }

  let path = std::path::Path::new(location);
  let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
  let file_url =
    url::Url::from_file_path(&absolute).map_err(|_| url::ParseError::RelativeUrlWithoutBase)?;
  url::Url::parse(&format!("{}://{}", default_scheme, file_url.path()))
}

/// 取出 URL 中的文件路径（解码百分号转义）
pub fn url_file_path(url: &url::Url) -> String {
  urlencoding::decode(url.path())
    .map(|path| path.into_owned())
    .unwrap_or_else(|_| url.path().to_string())
}
