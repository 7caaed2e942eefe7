// Whole-document XML encoding of books over resolved columns.
use std::io::Write;

use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::core::book::Book;
use crate::core::columns::Column;
use crate::core::error::{Error, ErrorKind};

const ROOT: &str = "books";
const ITEM: &str = "book";

/// Writes `<books>` with one `<book>` per record and one child per column.
///
/// Text is escaped for all five XML-reserved characters. Empty values still
/// produce their element.
pub fn write_xml<W: Write>(sink: W, books: &[Book], columns: &[Column]) -> Result<W, Error> {
    let mut writer = Writer::new(sink);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(&mut writer, Event::Text(BytesText::from_escaped("\n")))?;
    emit(&mut writer, Event::Start(BytesStart::new(ROOT)))?;
    for book in books {
        emit(&mut writer, Event::Start(BytesStart::new(ITEM)))?;
        for column in columns {
            let name = column.name();
            emit(&mut writer, Event::Start(BytesStart::new(name)))?;
            emit(
                &mut writer,
                Event::Text(BytesText::from_escaped(escape(column.value(book)))),
            )?;
            emit(&mut writer, Event::End(BytesEnd::new(name)))?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(ITEM)))?;
    }
    emit(&mut writer, Event::End(BytesEnd::new(ROOT)))?;
    emit(&mut writer, Event::Text(BytesText::from_escaped("\n")))?;
    Ok(writer.into_inner())
}

pub fn to_xml_bytes(books: &[Book], columns: &[Column]) -> Result<Vec<u8>, Error> {
    write_xml(Vec::new(), books, columns)
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), Error> {
    writer.write_event(event).map_err(|err| {
        Error::new(ErrorKind::Encoding)
            .with_message("failed to write xml")
            .with_source(err)
    })
}
