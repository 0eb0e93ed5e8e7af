use super::BlobError;
use lopdf::Document;

/// Split a PDF into standalone single-page PDFs, in page order.
pub fn split_pdf_pages(bytes: &[u8]) -> Result<Vec<Vec<u8>>, BlobError> {
    let document = Document::load_mem(bytes).map_err(|err| BlobError::Pdf(err.to_string()))?;
    let total = document.get_pages().len() as u32;

    let mut pages = Vec::with_capacity(total as usize);
    for page_number in 1..=total {
        let mut single = document.clone();
        let others: Vec<u32> = (1..=total).filter(|n| *n != page_number).collect();
        single.delete_pages(&others);
        single.prune_objects();
        let mut out = Vec::new();
        single
            .save_to(&mut out)
            .map_err(|err| BlobError::Pdf(err.to_string()))?;
        pages.push(out);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    /// Build an in-memory PDF with one line of text per page.
    fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let kids: Vec<Object> = texts
            .iter()
            .map(|text| {
                let content = Content {
                    operations: vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 24.into()]),
                        Operation::new("Td", vec![72.into(), 700.into()]),
                        Operation::new("Tj", vec![Object::string_literal(*text)]),
                        Operation::new("ET", vec![]),
                    ],
                };
                let content_id =
                    doc.add_object(Stream::new(dictionary! {}, content.encode().expect("encode")));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                })
                .into()
            })
            .collect();
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save pdf");
        bytes
    }

    #[test]
    fn each_page_becomes_its_own_document() {
        let bytes = pdf_with_pages(&["first page", "second page", "third page"]);
        let pages = split_pdf_pages(&bytes).expect("split");
        assert_eq!(pages.len(), 3);
        for page in &pages {
            let single = Document::load_mem(page).expect("valid pdf");
            assert_eq!(single.get_pages().len(), 1);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            split_pdf_pages(b"not a pdf"),
            Err(BlobError::Pdf(_))
        ));
    }
}
