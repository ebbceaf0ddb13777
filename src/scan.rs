use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::{Attribute, ExceptionRecord};
use jclassfile::class_file::{self, ClassFile};
use jclassfile::constant_pool::ConstantPool;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::bytecode::{ConstantResolver, decode_instructions};
use crate::ir::{
    Class, ExceptionHandler, Field, FieldId, Method, MethodAccess, MethodBody, MethodId,
};

const ACC_STATIC: u16 = 0x0008;

/// Parsed classes and artifacts of a scan.
pub(crate) struct ScanOutput {
    /// Classes found under the input path; the analysis targets.
    pub(crate) targets: Vec<Class>,
    /// Classes used only for hierarchy and callee lookups.
    pub(crate) classpath: Vec<Class>,
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) class_count: usize,
}

/// Mutable state threaded through one scan.
struct Scanner<'a> {
    classes: &'a mut Vec<Class>,
    artifacts: &'a mut Vec<Artifact>,
    class_count: &'a mut usize,
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut artifacts = Vec::new();
    let mut class_count = 0;
    let mut targets = Vec::new();
    let mut dependencies = Vec::new();

    Scanner {
        classes: &mut targets,
        artifacts: &mut artifacts,
        class_count: &mut class_count,
    }
    .scan_path(input, true, true)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    let mut scanner = Scanner {
        classes: &mut dependencies,
        artifacts: &mut artifacts,
        class_count: &mut class_count,
    };
    for entry in classpath_entries {
        scanner.scan_path(&entry, false, true)?;
    }

    log::debug!(
        "scanned {} target classes and {} classpath classes",
        targets.len(),
        dependencies.len()
    );
    Ok(ScanOutput {
        targets,
        classpath: dependencies,
        artifacts,
        class_count,
    })
}

impl Scanner<'_> {
    fn scan_path(&mut self, path: &Path, is_input: bool, strict: bool) -> Result<()> {
        if path.is_dir() {
            return self.scan_dir(path);
        }

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let roles = if is_input {
            let role = serde_json::to_value(ArtifactRoles::AnalysisTarget)
                .context("failed to serialize artifact role")?;
            Some(vec![role])
        } else {
            None
        };

        match extension {
            "class" => self.scan_class_file(path, roles),
            "jar" => self.scan_jar_file(path, roles),
            _ => {
                if strict {
                    anyhow::bail!("unsupported input file: {}", path.display())
                } else {
                    Ok(())
                }
            }
        }
    }

    fn scan_dir(&mut self, path: &Path) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
            entries.push(entry.path());
        }

        entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

        for entry in entries {
            if entry.is_dir() {
                self.scan_dir(&entry)?;
            } else {
                self.scan_path(&entry, false, false)?;
            }
        }

        Ok(())
    }

    fn scan_class_file(&mut self, path: &Path, roles: Option<Vec<Value>>) -> Result<()> {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let class =
            parse_class(&data).with_context(|| format!("failed to parse {}", path.display()))?;
        self.classes.push(class);
        *self.class_count += 1;

        let uri = path_to_uri(path);
        push_artifact(uri, data.len() as u64, None, roles, self.artifacts);
        Ok(())
    }

    fn scan_jar_file(&mut self, path: &Path, roles: Option<Vec<Value>>) -> Result<()> {
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

        let jar_len = fs::metadata(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .len();
        let jar_index = push_artifact(path_to_uri(path), jar_len, None, roles, self.artifacts);

        let mut entry_names = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if name.ends_with(".class") && !name.ends_with("module-info.class") {
                entry_names.push(name);
            }
        }

        entry_names.sort();

        for name in entry_names {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let class = parse_class(&data)
                .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
            self.classes.push(class);
            *self.class_count += 1;

            let entry_uri = jar_entry_uri(path, &name);
            push_artifact(entry_uri, entry.size(), Some(jar_index), None, self.artifacts);
        }

        Ok(())
    }
}

/// Parse one class file into IR. A method whose code cannot be decoded keeps no body.
pub(crate) fn parse_class(data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).context("invalid class file")?;
    let pool = ConstantPoolView {
        entries: class_file.constant_pool(),
    };
    let name = pool.class_name(class_file.this_class())?.to_string();
    let super_name = match class_file.super_class() {
        0 => None,
        index => Some(pool.class_name(index)?.to_string()),
    };
    let interfaces = class_file
        .interfaces()
        .iter()
        .map(|index| pool.class_name(*index).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;

    let mut fields = Vec::new();
    for field in class_file.fields() {
        fields.push(Field {
            id: FieldId::new(
                name.as_str(),
                pool.utf8(field.name_index())?,
                pool.utf8(field.descriptor_index())?,
            ),
            is_static: field.access_flags().bits() & ACC_STATIC != 0,
        });
    }

    let methods = parse_methods(&class_file, &pool, &name)?;

    Ok(Class {
        name,
        super_name,
        interfaces,
        fields,
        methods,
    })
}

fn parse_methods(
    class_file: &ClassFile,
    pool: &ConstantPoolView<'_>,
    class_name: &str,
) -> Result<Vec<Method>> {
    let mut methods = Vec::new();
    for method in class_file.methods() {
        let id = MethodId::new(
            class_name,
            pool.utf8(method.name_index())?,
            pool.utf8(method.descriptor_index())?,
        );
        let code = method.attributes().iter().find_map(|attribute| match attribute {
            Attribute::Code {
                code,
                exception_table,
                ..
            } => Some((code.as_slice(), exception_table.as_slice())),
            _ => None,
        });
        let body = code.and_then(|(code, table)| match decode_instructions(code, pool) {
            Ok(instructions) => {
                Some(MethodBody::new(instructions).with_handlers(exception_handlers(table)))
            }
            Err(err) => {
                log::debug!("cannot decode {}: {:#}", id, err);
                None
            }
        });
        methods.push(Method {
            id,
            access: MethodAccess {
                is_static: method.access_flags().bits() & ACC_STATIC != 0,
            },
            body,
        });
    }
    Ok(methods)
}

fn exception_handlers(table: &[ExceptionRecord]) -> Vec<ExceptionHandler> {
    table
        .iter()
        .map(|record| ExceptionHandler {
            start_pc: u32::from(record.start_pc()),
            end_pc: u32::from(record.end_pc()),
            handler_pc: u32::from(record.handler_pc()),
        })
        .collect()
}

/// Typed lookups over a class file's constant pool.
struct ConstantPoolView<'a> {
    entries: &'a [ConstantPool],
}

impl ConstantPoolView<'_> {
    fn entry(&self, index: u16) -> Result<&ConstantPool> {
        self.entries
            .get(index as usize)
            .with_context(|| format!("constant pool index {} out of range", index))
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            ConstantPool::Utf8 { value } => Ok(value.as_str()),
            _ => anyhow::bail!("constant pool entry {} is not UTF-8", index),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            ConstantPool::Class { name_index } => self.utf8(*name_index),
            _ => anyhow::bail!("constant pool entry {} is not a class", index),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.entry(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => anyhow::bail!("constant pool entry {} is not a name and type", index),
        }
    }

    fn member(&self, class_index: u16, name_and_type_index: u16) -> Result<(&str, &str, &str)> {
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok((owner, name, descriptor))
    }
}

impl ConstantResolver for ConstantPoolView<'_> {
    fn field_ref(&self, index: u16) -> Result<FieldId> {
        match self.entry(index)? {
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            } => {
                let (owner, name, descriptor) = self.member(*class_index, *name_and_type_index)?;
                Ok(FieldId::new(owner, name, descriptor))
            }
            _ => anyhow::bail!("constant pool entry {} is not a field reference", index),
        }
    }

    fn method_ref(&self, index: u16) -> Result<MethodId> {
        match self.entry(index)? {
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                let (owner, name, descriptor) = self.member(*class_index, *name_and_type_index)?;
                Ok(MethodId::new(owner, name, descriptor))
            }
            _ => anyhow::bail!("constant pool entry {} is not a method reference", index),
        }
    }
}

/// Push an artifact and return its index for parent linkage (e.g., JAR entries).
fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
