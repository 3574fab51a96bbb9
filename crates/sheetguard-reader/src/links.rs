//! External workbook links of an OOXML package.
//!
//! Formulas refer to linked workbooks as `[1]`, `[2]`, ... in the order of the
//! `<externalReference>` entries in `xl/workbook.xml`. Each entry points, via
//! the workbook relationships, at an `externalLinkN.xml` part whose own
//! relationships carry the linked file's path.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;
use zip::ZipArchive;

struct Relationship {
    id: String,
    kind: String,
    target: String,
}

/// Linked workbook paths, indexed so that entry `n - 1` is `[n]`. Returns an
/// empty list for non-zip formats or packages without links.
pub fn external_workbooks(path: &Path) -> Vec<String> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    match ZipArchive::new(file) {
        Ok(mut archive) => read_links(&mut archive),
        Err(e) => {
            debug!(path = %path.display(), "not a zip package, external links unavailable: {e}");
            Vec::new()
        }
    }
}

fn read_links<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Vec<String> {
    let Some(workbook_xml) = read_part(archive, "xl/workbook.xml") else {
        return Vec::new();
    };
    let ids = external_reference_ids(&workbook_xml);
    if ids.is_empty() {
        return Vec::new();
    }
    let rels: HashMap<String, String> = read_part(archive, "xl/_rels/workbook.xml.rels")
        .map(|xml| {
            relationships(&xml)
                .into_iter()
                .map(|r| (r.id, r.target))
                .collect()
        })
        .unwrap_or_default();

    let mut links = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let target = rels.get(id).and_then(|part| {
            let file_name = part.rsplit('/').next().unwrap_or(part);
            let rels_path = format!("xl/externalLinks/_rels/{file_name}.rels");
            let xml = read_part(archive, &rels_path)?;
            relationships(&xml)
                .into_iter()
                .find(|r| r.kind.ends_with("/externalLinkPath"))
                .map(|r| r.target)
        });
        // Keep positions aligned: an unreadable link stays as its bare index.
        links.push(target.unwrap_or_else(|| (i + 1).to_string()));
    }
    debug!(links = links.len(), "read external workbook links");
    links
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<String> {
    let mut part = archive.by_name(name).ok()?;
    let mut content = String::new();
    part.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Relationship ids of `<externalReference>` elements, in document order.
fn external_reference_ids(workbook_xml: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"externalReference" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"id" {
                        ids.push(String::from_utf8_lossy(&attr.value).into_owned());
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    ids
}

fn relationships(rels_xml: &str) -> Vec<Relationship> {
    let mut out = Vec::new();
    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut rel = Relationship {
                    id: String::new(),
                    kind: String::new(),
                    target: String::new(),
                };
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"Id" => rel.id = value,
                        b"Type" => rel.kind = value,
                        b"Target" => rel.target = value,
                        _ => {}
                    }
                }
                out.push(rel);
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
          xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets><sheet name="Model" sheetId="1" r:id="rId1"/></sheets>
  <externalReferences>
    <externalReference r:id="rId5"/>
    <externalReference r:id="rId4"/>
  </externalReferences>
</workbook>"#;

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLink" Target="externalLinks/externalLink2.xml"/>
  <Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLink" Target="externalLinks/externalLink1.xml"/>
</Relationships>"#;

    fn link_rels(target: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLinkPath" Target="{target}" TargetMode="External"/>
</Relationships>"#
        )
    }

    fn write_package(path: &Path, parts: &[(&str, String)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, content) in parts {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_external_reference_ids_in_document_order() {
        assert_eq!(external_reference_ids(WORKBOOK), vec!["rId5", "rId4"]);
    }

    #[test]
    fn test_links_follow_workbook_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.xlsx");
        write_package(
            &path,
            &[
                ("xl/workbook.xml", WORKBOOK.to_string()),
                ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
                ("xl/externalLinks/_rels/externalLink1.xml.rels", link_rels("rates.xlsx")),
                (
                    "xl/externalLinks/_rels/externalLink2.xml.rels",
                    link_rels("file:///C:/shared/fx.xlsx"),
                ),
            ],
        );
        assert_eq!(
            external_workbooks(&path),
            vec!["rates.xlsx".to_string(), "file:///C:/shared/fx.xlsx".to_string()]
        );
    }

    #[test]
    fn test_missing_link_part_keeps_its_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.xlsx");
        write_package(
            &path,
            &[
                ("xl/workbook.xml", WORKBOOK.to_string()),
                ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
                (
                    "xl/externalLinks/_rels/externalLink2.xml.rels",
                    link_rels("fx.xlsx"),
                ),
            ],
        );
        assert_eq!(
            external_workbooks(&path),
            vec!["1".to_string(), "fx.xlsx".to_string()]
        );
    }

    #[test]
    fn test_non_zip_file_has_no_links() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.xls");
        std::fs::write(&path, b"not a zip archive").unwrap();
        assert!(external_workbooks(&path).is_empty());
    }
}
