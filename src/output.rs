// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;
use crate::model::ProcessResult;

pub trait Render: Sized {
  type Error;
  fn render_result(&self, image: &RgbImage, results: &[ProcessResult]) -> Result<(), Self::Error>;
}

/// 依次渲染到每个输出，遇到第一个错误即停止
impl<O: Render> Render for Vec<O> {
  type Error = O::Error;

  fn render_result(&self, image: &RgbImage, results: &[ProcessResult]) -> Result<(), Self::Error> {
    for output in self {
      output.render_result(image, results)?;
    }
    Ok(())
  }
}

mod table;
pub use self::table::{DEFAULT_COLUMN_WIDTH, ResultFormatter, TableOutput, format_results};

#[cfg(feature = "save_image_file")]
mod visualizer;
#[cfg(feature = "save_image_file")]
pub use self::visualizer::{FontError, Visualizer};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{
  DirectoryRecordOutput, DirectoryRecordOutputError, results_to_json,
};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("表格输出错误: {0}")]
  TableError(#[from] std::io::Error),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Table(TableOutput),
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    {
      if url.scheme() == SaveImageFileOutput::SCHEME {
        let output = SaveImageFileOutput::from_url(url)?;
        return Ok(OutputWrapper::SaveImageFileOutput(output));
      }
    }
    #[cfg(feature = "directory_record")]
    {
      if url.scheme() == DirectoryRecordOutput::SCHEME {
        let output = DirectoryRecordOutput::from_url(url)?;
        return Ok(OutputWrapper::DirectoryRecordOutput(output));
      }
    }
    if url.scheme() == "table" {
      return Ok(OutputWrapper::Table(TableOutput::default()));
    }
    Err(OutputError::SchemeMismatch)
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, image: &RgbImage, results: &[ProcessResult]) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Table(output) => output
        .render_result(image, results)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(image, results)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(image, results)
        .map_err(OutputError::from),
    }
  }
}
